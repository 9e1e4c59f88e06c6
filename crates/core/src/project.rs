//! Project identity, lifecycle status, and the stored entity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between owner and name in the storage key.
///
/// Owners may never contain it, so the first occurrence always marks the
/// boundary and the key form stays unambiguous.
pub const KEY_SEPARATOR: char = '_';

/// Composite `(owner, name)` identifier of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectIdentifier {
    owner: String,
    name: String,
}

impl ProjectIdentifier {
    /// Create a validated identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentifier` if the owner is empty or contains
    /// `_`, or if the name is empty.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();

        if owner.is_empty() {
            return Err(Error::invalid_identifier(
                format!("{owner}{KEY_SEPARATOR}{name}"),
                "owner must not be empty",
            ));
        }
        if owner.contains(KEY_SEPARATOR) {
            return Err(Error::invalid_identifier(
                format!("{owner}{KEY_SEPARATOR}{name}"),
                format!("owner must not contain '{KEY_SEPARATOR}'"),
            ));
        }
        if name.is_empty() {
            return Err(Error::invalid_identifier(
                format!("{owner}{KEY_SEPARATOR}{name}"),
                "name must not be empty",
            ));
        }

        Ok(Self { owner, name })
    }

    /// Parse the `owner_name` storage form.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentifier` if the key has no separator or
    /// either half fails validation.
    pub fn parse(key: &str) -> Result<Self> {
        let (owner, name) = key
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| Error::invalid_identifier(key, "missing owner/name separator"))?;
        Self::new(owner, name)
    }

    /// Owning user.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Project name, unique per owner.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deterministic storage key: `owner_name`.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.owner, self.name)
    }
}

impl fmt::Display for ProjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.owner, self.name)
    }
}

impl FromStr for ProjectIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lifecycle status of a project.
///
/// Any status may replace any other; producers own the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    #[default]
    New,
    GeneratePending,
    GenerateSuccess,
    GenerateFail,
    DeployPending,
    DeploySuccess,
    DeployFail,
    Running,
    Stopped,
    Failed,
}

impl ProjectStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::New,
        Self::GeneratePending,
        Self::GenerateSuccess,
        Self::GenerateFail,
        Self::DeployPending,
        Self::DeploySuccess,
        Self::DeployFail,
        Self::Running,
        Self::Stopped,
        Self::Failed,
    ];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::GeneratePending => "GENERATE_PENDING",
            Self::GenerateSuccess => "GENERATE_SUCCESS",
            Self::GenerateFail => "GENERATE_FAIL",
            Self::DeployPending => "DEPLOY_PENDING",
            Self::DeploySuccess => "DEPLOY_SUCCESS",
            Self::DeployFail => "DEPLOY_FAIL",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| Error::unknown_status(s))
    }
}

/// A user-owned project as persisted and streamed to watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Owning user.
    pub owner: String,
    /// Project name.
    pub name: String,
    /// Opaque payload, never interpreted by the pipeline.
    pub data: serde_json::Value,
    /// Current lifecycle status.
    pub status: ProjectStatus,
    /// Location of the generated archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    /// Location of the running deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// A freshly initialised project: status `NEW`, empty data.
    #[must_use]
    pub fn new(id: &ProjectIdentifier) -> Self {
        let now = Utc::now();
        Self {
            owner: id.owner().to_string(),
            name: id.name().to_string(),
            data: serde_json::Value::Object(serde_json::Map::new()),
            status: ProjectStatus::New,
            artifact_url: None,
            deploy_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage key of this project.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.owner, self.name)
    }

    /// Advance `updated_at` to `now` without ever moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_storage_key_format() {
        let id = ProjectIdentifier::new("alice", "app1").unwrap();
        assert_eq!(id.storage_key(), "alice_app1");
        assert_eq!(id.to_string(), "alice_app1");
    }

    #[test]
    fn test_parse_splits_at_first_separator() {
        let id = ProjectIdentifier::parse("bob_my_cool_app").unwrap();
        assert_eq!(id.owner(), "bob");
        assert_eq!(id.name(), "my_cool_app");
    }

    #[test]
    fn test_owner_with_separator_rejected() {
        let result = ProjectIdentifier::new("al_ice", "app");
        assert!(matches!(result, Err(Error::InvalidIdentifier { .. })));
    }

    #[test]
    fn test_empty_parts_rejected() {
        assert!(ProjectIdentifier::new("", "app").is_err());
        assert!(ProjectIdentifier::new("alice", "").is_err());
        assert!(ProjectIdentifier::parse("alice_").is_err());
        assert!(ProjectIdentifier::parse("_app").is_err());
        assert!(ProjectIdentifier::parse("aliceapp").is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ProjectStatus::ALL {
            assert_eq!(status.as_str().parse::<ProjectStatus>(), Ok(status));
        }
        assert!("PAUSED".parse::<ProjectStatus>().is_err());
        assert!("running".parse::<ProjectStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_wire_names() {
        let json = serde_json::to_string(&ProjectStatus::GeneratePending).unwrap();
        assert_eq!(json, "\"GENERATE_PENDING\"");
    }

    #[test]
    fn test_new_project_defaults() {
        let id = ProjectIdentifier::new("alice", "app1").unwrap();
        let project = Project::new(&id);
        assert_eq!(project.status, ProjectStatus::New);
        assert_eq!(project.data, serde_json::json!({}));
        assert_eq!(project.created_at, project.updated_at);
        assert_eq!(project.storage_key(), id.storage_key());
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let id = ProjectIdentifier::new("alice", "app1").unwrap();
        let mut project = Project::new(&id);
        let original = project.updated_at;

        project.touch(original - chrono::Duration::seconds(5));
        assert_eq!(project.updated_at, original);

        let later = original + chrono::Duration::seconds(5);
        project.touch(later);
        assert_eq!(project.updated_at, later);
    }

    #[test]
    fn test_project_json_is_camel_case() {
        let id = ProjectIdentifier::new("alice", "app1").unwrap();
        let mut project = Project::new(&id);
        project.artifact_url = Some("https://cdn/app1.zip".to_string());

        let json = serde_json::to_value(&project).unwrap();
        assert_eq!(json["artifactUrl"], "https://cdn/app1.zip");
        assert!(json.get("deployUrl").is_none());
        assert!(json.get("createdAt").is_some());
    }

    proptest! {
        #[test]
        fn prop_storage_key_parses_back(
            owner in "[a-zA-Z0-9-]{1,16}",
            name in "[a-zA-Z0-9_-]{1,24}",
        ) {
            let id = ProjectIdentifier::new(owner, name).unwrap();
            let parsed = ProjectIdentifier::parse(&id.storage_key()).unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn prop_distinct_ids_have_distinct_keys(
            a in ("[a-z]{1,6}", "[a-z_]{1,8}"),
            b in ("[a-z]{1,6}", "[a-z_]{1,8}"),
        ) {
            let id_a = ProjectIdentifier::new(a.0, a.1);
            let id_b = ProjectIdentifier::new(b.0, b.1);
            if let (Ok(id_a), Ok(id_b)) = (id_a, id_b) {
                prop_assert_eq!(id_a == id_b, id_a.storage_key() == id_b.storage_key());
            }
        }
    }
}
