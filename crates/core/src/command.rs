//! Typed update commands produced by the event decoder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::project::{ProjectIdentifier, ProjectStatus};

/// A single state transition to apply to a stored project.
///
/// Each variant is a last-write-wins field set, so applying the same command
/// twice leaves the project in the same state as applying it once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateCommand {
    StatusChanged {
        id: ProjectIdentifier,
        status: ProjectStatus,
    },
    ArtifactUrlChanged {
        id: ProjectIdentifier,
        url: String,
    },
    DeployUrlChanged {
        id: ProjectIdentifier,
        url: String,
    },
}

impl UpdateCommand {
    /// Project the command targets.
    #[must_use]
    pub fn id(&self) -> &ProjectIdentifier {
        match self {
            Self::StatusChanged { id, .. }
            | Self::ArtifactUrlChanged { id, .. }
            | Self::DeployUrlChanged { id, .. } => id,
        }
    }

    /// Short label for log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::ArtifactUrlChanged { .. } => "artifact_url_changed",
            Self::DeployUrlChanged { .. } => "deploy_url_changed",
        }
    }
}

impl fmt::Display for UpdateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusChanged { id, status } => write!(f, "{id} status -> {status}"),
            Self::ArtifactUrlChanged { id, url } => write!(f, "{id} artifact -> {url}"),
            Self::DeployUrlChanged { id, url } => write!(f, "{id} deploy -> {url}"),
        }
    }
}
