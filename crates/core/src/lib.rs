//! Core library for the chaincode container controller
//!
//! Deterministic naming of chaincode images and containers, build-context
//! assembly, the container engine client abstraction and the lifecycle
//! controller that drives Deploy, Start, Stop and Destroy against it.

pub mod build_context;
pub mod config;
pub mod controller;
pub mod docker;
pub mod errors;
pub mod logging;
pub mod naming;
pub mod retry;

pub use controller::{DockerVm, StopOptions};
pub use naming::{ChaincodeId, ScopeId};

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
