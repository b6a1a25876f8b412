//! # corral-ipc
//!
//! Daemon plumbing shared by the corral supervisor and its CLI: project-local
//! state paths, the newline-delimited JSON socket server, a blocking client,
//! and control-endpoint ownership (probe, claim, cleanup, background launch).

pub mod paths;
pub mod server;
pub mod client;
pub mod endpoint;

pub use paths::DaemonPaths;
pub use client::{DaemonClient, ClientError};
pub use endpoint::{Endpoint, EndpointError, EndpointState};
