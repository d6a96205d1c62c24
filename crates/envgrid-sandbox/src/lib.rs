//! envgrid-sandbox — run caller-supplied shell commands on the host.
//!
//! ```text
//!   commands ──► screen (rm / rmdir / unlink / shred?) ──► reject, nothing runs
//!                  │
//!                  ▼
//!              run_shell(c1) ──► run_shell(c2) ──► ... ──► CommandRunRecord
//! ```
//!
//! Commands run one after another through the process runner. A nonzero
//! exit is recorded, not fatal; the next command still runs.

pub mod record;
pub mod sandbox;

pub use record::{CommandDetails, CommandEntry, CommandMap, CommandRunRecord, CommandStatus};
pub use sandbox::{CommandSandbox, DEFAULT_RUNS_CAPACITY, screen};
