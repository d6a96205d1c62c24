//! envgrid-state — where deployments live between requests.
//!
//! Two stores, both shared across tasks behind an `Arc`:
//!
//! ```text
//!   FilesystemStore                    MetadataStore
//!   <root>/<id>/                       id -> x-metadata (JSON object)
//!     docker-compose.yml               capacity-bounded, RwLock-guarded
//!     metadata.json
//!   <root>/<id>.tar.gz   (archive)
//! ```
//!
//! The directory modification time is the lifecycle clock used by the
//! expiry and reclamation schedulers.

pub mod error;
pub mod fs;
pub mod metadata;

pub use error::{StateError, StateResult};
pub use fs::{FilesystemStore, METADATA_FILE};
pub use metadata::MetadataStore;
