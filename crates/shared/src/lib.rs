//! Types shared between the session controller, the orchestrator and the host binaries.

pub mod domain;
pub mod error;
pub mod protocol;
