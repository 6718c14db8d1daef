//! Harness for comparing containerized fuzzing tools against
//! containerized API targets.
//!
//! The harness brings a target service up with docker-compose, watches
//! its logs for a readiness signal, runs a fuzzing tool against it as a
//! one-off container command, and harvests the evidence from both sides
//! into a uniform output tree. Targets and fuzzers are addressed by
//! qualified `base[:variant]` names resolved from a [`Catalog`]; the
//! per-component behavior lives behind the [`TargetAdapter`] and
//! [`FuzzerAdapter`] traits, registered in catalogs at build time.

pub mod artifacts;
pub mod compose;
pub mod constants;
pub mod errors;
pub mod fuzzer;
pub mod metadata;
pub mod network;
pub mod registry;
pub mod run;
pub mod sentry;
pub mod target;
pub mod utils;

pub use artifacts::Artifact;
pub use compose::{ComposeRuntime, DockerCompose};
pub use errors::HarnessError;
pub use fuzzer::{FuzzResult, Fuzzer, FuzzerAdapter, FuzzerContext, SchemaStrategy};
pub use registry::Catalog;
pub use run::{execute, execute_standalone, FuzzOptions, RunOptions};
pub use sentry::SentryConfig;
pub use target::{Target, TargetAdapter, TargetContext, TargetOptions, TargetState};

use tracing_subscriber::EnvFilter;

/// Initialize logging for harness binaries.
///
/// Respects `RUST_LOG`, defaulting to `info`. Safe to call more than
/// once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
