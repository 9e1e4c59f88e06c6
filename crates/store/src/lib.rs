//! Project state repository for projectd.
//!
//! The [`ProjectRepository`] trait is the storage seam used by both the event
//! pipeline and the HTTP API. Two backends implement it:
//! - [`SurrealProjectStore`]: SurrealDB over any engine (`mem://`, `ws://`, ...)
//! - [`InMemoryProjectStore`]: a process-local map for tests and ephemeral runs

pub mod error;
pub mod memory;
pub mod repository;
pub mod surreal;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryProjectStore;
pub use repository::{DEFAULT_LIMIT, DEFAULT_PAGE, Page, ProjectRepository};
pub use surreal::{Credentials, StoreConfig, SurrealProjectStore};
