//! envgrid-core — shared types, configuration, and the error taxonomy.
//!
//! Every other envgrid crate depends on this one. It carries no runtime
//! behavior beyond id handling and config loading.

pub mod config;
pub mod error;
pub mod types;

pub use config::{EnvgridConfig, PROTECTED_KEYS};
pub use error::{BoxError, EnvgridError, EnvgridResult, ErrorKind, Rejection};
pub use types::*;
