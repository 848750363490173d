//! kubectl-kruise: lifecycle operations for OpenKruise and Kubernetes workloads.
//!
//! The binary is a thin wrapper over [`commands::run`]. The library exposes
//! the mutation [`pipeline`] and its Kubernetes seams so they can be driven
//! directly in tests.

pub mod commands;
pub mod config;
pub mod k8s;
pub mod manifest;
pub mod pipeline;
pub mod printer;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod top;
