//! Compiled wire codecs.
//!
//! A [`Codec`] binds one Avro schema to one wire format and turns payload
//! bytes into a generic Avro [`Value`].
//!
//! The JSON format reads the Avro JSON encoding, where a non-null union
//! value is wrapped in a single-key object naming its branch
//! (`{"string": "..."}`). Unwrapped union values are accepted as well.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use apache_avro::Schema;
use apache_avro::types::Value;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, SchemaError};

/// Leading byte of a Confluent-framed binary payload.
pub const CONFLUENT_MAGIC: u8 = 0;

const CONFLUENT_HEADER_LEN: usize = 5;

/// How event payloads are encoded on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Avro JSON encoding, validated against the schema.
    #[default]
    Json,
    /// Confluent framing followed by an Avro binary datum.
    Binary,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown wire format '{other}' (expected json or binary)")),
        }
    }
}

/// A schema compiled for decoding one subject's payloads.
#[derive(Debug, Clone)]
pub struct Codec {
    subject: String,
    schema: Schema,
    format: WireFormat,
    schema_id: Option<u32>,
    /// Named types by full name, for following `Ref`s while unwrapping unions.
    named: HashMap<String, Schema>,
}

impl Codec {
    /// Compile `text` into a codec.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Invalid` if the text is not a valid Avro schema.
    pub fn compile(
        subject: impl Into<String>,
        text: &str,
        format: WireFormat,
    ) -> Result<Self, SchemaError> {
        let subject = subject.into();
        let schema =
            Schema::parse_str(text).map_err(|e| SchemaError::invalid(&subject, e.to_string()))?;
        let mut named = HashMap::new();
        collect_named(&schema, &mut named);

        Ok(Self {
            subject,
            schema,
            format,
            schema_id: None,
            named,
        })
    }

    /// Attach the registry id of the compiled schema.
    #[must_use]
    pub fn with_schema_id(mut self, schema_id: Option<u32>) -> Self {
        self.schema_id = schema_id;
        self
    }

    /// Registry subject the schema was resolved from.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub const fn format(&self) -> WireFormat {
        self.format
    }

    /// Registry id, when the registry reported one.
    #[must_use]
    pub const fn schema_id(&self) -> Option<u32> {
        self.schema_id
    }

    /// Decode `bytes` into a generic record.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` if the bytes do not match the schema.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        match self.format {
            WireFormat::Json => self.decode_json(bytes),
            WireFormat::Binary => self.decode_binary(bytes),
        }
    }

    fn decode_json(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        let json: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        Value::from(unwrap_unions(json, &self.schema, &self.named))
            .resolve(&self.schema)
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        let (header, datum) = bytes
            .split_at_checked(CONFLUENT_HEADER_LEN)
            .ok_or_else(|| DecodeError::Malformed("payload shorter than framing header".into()))?;

        if let Some(&magic) = header.first().filter(|&&b| b != CONFLUENT_MAGIC) {
            return Err(DecodeError::Malformed(format!(
                "unexpected magic byte {magic}"
            )));
        }

        let mut reader = Cursor::new(datum);
        let value = apache_avro::from_avro_datum(&self.schema, &mut reader, None)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if usize::try_from(reader.position()).ok() != Some(datum.len()) {
            return Err(DecodeError::Malformed("trailing bytes after datum".into()));
        }

        Ok(value)
    }
}

/// Strip Avro JSON union wrappers so the value resolves against `schema`.
fn unwrap_unions(
    json: serde_json::Value,
    schema: &Schema,
    named: &HashMap<String, Schema>,
) -> serde_json::Value {
    use serde_json::Value as Json;

    match (schema, json) {
        (Schema::Record(record), Json::Object(fields)) => Json::Object(
            fields
                .into_iter()
                .map(|(key, value)| {
                    let field = record
                        .lookup
                        .get(&key)
                        .and_then(|&index| record.fields.get(index));
                    let value = match field {
                        Some(field) => unwrap_unions(value, &field.schema, named),
                        None => value,
                    };
                    (key, value)
                })
                .collect(),
        ),
        (Schema::Union(union), Json::Object(wrapper)) if wrapper.len() == 1 => {
            let mut entries = wrapper.into_iter();
            let Some((branch_key, inner)) = entries.next() else {
                return Json::Object(serde_json::Map::new());
            };
            let branch = union
                .variants()
                .iter()
                .find(|variant| is_branch(variant, &branch_key));
            match branch {
                Some(branch) => unwrap_unions(inner, branch, named),
                None => Json::Object(std::iter::once((branch_key, inner)).collect()),
            }
        }
        (Schema::Array(array), Json::Array(items)) => Json::Array(
            items
                .into_iter()
                .map(|item| unwrap_unions(item, &array.items, named))
                .collect(),
        ),
        (Schema::Map(map), Json::Object(entries)) => Json::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, unwrap_unions(value, &map.types, named)))
                .collect(),
        ),
        (Schema::Ref { name }, json) => match named.get(&name.fullname(None)) {
            Some(target) => unwrap_unions(json, target, named),
            None => json,
        },
        (_, json) => json,
    }
}

/// Whether `key` names `schema` as a union branch in the Avro JSON encoding.
///
/// Named types are matched by full name, or by bare name when the writer
/// left the namespace out.
fn is_branch(schema: &Schema, key: &str) -> bool {
    let primitive = match schema {
        Schema::Null => "null",
        Schema::Boolean => "boolean",
        Schema::Int => "int",
        Schema::Long => "long",
        Schema::Float => "float",
        Schema::Double => "double",
        Schema::Bytes => "bytes",
        Schema::String => "string",
        Schema::Array(_) => "array",
        Schema::Map(_) => "map",
        _ => {
            return schema
                .name()
                .is_some_and(|name| name.name == key || name.fullname(None) == key);
        }
    };
    primitive == key
}

fn collect_named(schema: &Schema, named: &mut HashMap<String, Schema>) {
    match schema {
        Schema::Record(record) => {
            named.insert(record.name.fullname(None), schema.clone());
            for field in &record.fields {
                collect_named(&field.schema, named);
            }
        }
        Schema::Enum(_) | Schema::Fixed(_) => {
            if let Some(name) = schema.name() {
                named.insert(name.fullname(None), schema.clone());
            }
        }
        Schema::Union(union) => {
            for variant in union.variants() {
                collect_named(variant, named);
            }
        }
        Schema::Array(array) => collect_named(&array.items, named),
        Schema::Map(map) => collect_named(&map.types, named),
        _ => {}
    }
}

/// Frame an Avro datum the way Confluent serializers do.
#[must_use]
pub fn confluent_frame(schema_id: u32, datum: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(CONFLUENT_HEADER_LEN.saturating_add(datum.len()));
    framed.push(CONFLUENT_MAGIC);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(datum);
    framed
}
