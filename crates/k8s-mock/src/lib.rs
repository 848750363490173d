//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.
//! Besides the built-in workload APIs it serves the OpenKruise `apps.kruise.io`
//! group, answers JSON merge patches (including server-side dry run and
//! `resourceVersion` preconditions) and records every write it receives.

pub mod discovery;
pub mod helpers;
pub mod http;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, RecordedPatch, RunningHttpMockK8sServer};
