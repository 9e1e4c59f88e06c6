//! Mapping decoded records to typed update commands.

use std::fmt;
use std::str::FromStr;

use apache_avro::types::Value;
use projectd_core::{ProjectIdentifier, ProjectStatus, UpdateCommand};
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::DecodeError;

/// The closed set of event types the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `{id, status}`: a lifecycle status change.
    ProjectStatus,
    /// `{owner, name, url}`: a newly packaged archive.
    NewZip,
    /// `{owner, name, url}`: a finished deployment.
    DeployPayload,
}

impl EventKind {
    pub const ALL: [Self; 3] = [Self::ProjectStatus, Self::NewZip, Self::DeployPayload];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectStatus => "ProjectStatus",
            Self::NewZip => "NewZip",
            Self::DeployPayload => "DeployPayload",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

/// Decode `raw` with `codec` and map it to the command for `kind`.
///
/// # Errors
///
/// Returns a [`DecodeError`] for unparsable bytes, missing or mistyped
/// fields, an unknown status, or an invalid identifier.
pub fn decode(kind: EventKind, raw: &[u8], codec: &Codec) -> Result<UpdateCommand, DecodeError> {
    let record = codec.decode(raw)?;
    map_record(kind, &record)
}

/// Map an already decoded record to the command for `kind`.
///
/// # Errors
///
/// See [`decode`].
pub fn map_record(kind: EventKind, record: &Value) -> Result<UpdateCommand, DecodeError> {
    let fields = Fields::of(record)?;

    match kind {
        EventKind::ProjectStatus => {
            let id = ProjectIdentifier::parse(fields.string("id")?)?;
            let status = fields.string("status")?.parse::<ProjectStatus>()?;
            Ok(UpdateCommand::StatusChanged { id, status })
        }
        EventKind::NewZip => Ok(UpdateCommand::ArtifactUrlChanged {
            id: fields.owner_and_name()?,
            url: fields.string("url")?.to_string(),
        }),
        EventKind::DeployPayload => Ok(UpdateCommand::DeployUrlChanged {
            id: fields.owner_and_name()?,
            url: fields.string("url")?.to_string(),
        }),
    }
}

struct Fields<'a>(&'a [(String, Value)]);

impl<'a> Fields<'a> {
    fn of(record: &'a Value) -> Result<Self, DecodeError> {
        match record {
            Value::Record(fields) => Ok(Self(fields)),
            _ => Err(DecodeError::Malformed("payload is not a record".into())),
        }
    }

    fn string(&self, field: &'static str) -> Result<&'a str, DecodeError> {
        let value = self
            .0
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
            .ok_or(DecodeError::MissingField(field))?;

        match unwrap_union(value) {
            Value::String(s) => Ok(s.as_str()),
            Value::Null => Err(DecodeError::MissingField(field)),
            _ => Err(DecodeError::WrongType {
                field,
                expected: "string",
            }),
        }
    }

    fn owner_and_name(&self) -> Result<ProjectIdentifier, DecodeError> {
        Ok(ProjectIdentifier::new(
            self.string("owner")?,
            self.string("name")?,
        )?)
    }
}

fn unwrap_union(value: &Value) -> &Value {
    match value {
        Value::Union(_, inner) => unwrap_union(inner),
        other => other,
    }
}
