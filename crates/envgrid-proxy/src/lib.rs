//! envgrid-proxy — reaching into live workloads.
//!
//! - [`NetworkAttachment`] connects a deployment's container to the control
//!   plane's own network (and back out), with idempotent outcomes.
//! - [`RequestForwarder`] relays one HTTP request to a service inside a
//!   deployment and returns the response verbatim.

pub mod forward;
pub mod network;

pub use forward::{ForwardRequest, ForwardResponse, RequestForwarder, forward_to};
pub use network::{AttachOutcome, DetachOutcome, NetworkAttachment, container_name};
