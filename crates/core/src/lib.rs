//! Core domain types for projectd.
//!
//! This crate holds the pure data model shared by the store, event pipeline,
//! and HTTP API:
//! - [`ProjectIdentifier`] and its `owner_name` storage key
//! - [`Project`] and the closed [`ProjectStatus`] vocabulary
//! - [`UpdateCommand`], the typed transitions produced from bus events

pub mod command;
pub mod error;
pub mod project;

pub use command::UpdateCommand;
pub use error::{Error, Result};
pub use project::{KEY_SEPARATOR, Project, ProjectIdentifier, ProjectStatus};
