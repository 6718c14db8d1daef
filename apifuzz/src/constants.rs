//! Shared constants for the harness.

/// How long to wait for a target to become ready, in seconds.
pub const WAIT_TARGET_READY_TIMEOUT: u64 = 600;

/// Delay between log snapshot fetches while awaiting readiness, in milliseconds.
pub const LOG_POLL_INTERVAL_MS: u64 = 500;

/// Prefix for temporary directories shared with fuzzer containers.
pub const TEMPORARY_DIRECTORY_PREFIX: &str = "apifuzz-";

/// Default compose file name inside a component's directory.
pub const DEFAULT_COMPOSE_FILENAME: &str = "docker-compose.yml";

/// Default compose service name for fuzzers.
pub const DEFAULT_FUZZER_SERVICE_NAME: &str = "fuzzer";

/// Minimum supported docker-compose version.
pub const MINIMUM_COMPOSE_VERSION: (u64, u64, u64) = (1, 28, 0);

/// Minimum supported Docker version.
pub const MINIMUM_DOCKER_VERSION: (u64, u64, u64) = (20, 10, 0);

/// Tag attached to telemetry events so they can be correlated with one run.
pub const RUN_ID_TAG: &str = "apifuzz.run-id";

/// Environment variable used to salt compose project names so that
/// concurrently running workers never share containers or networks.
pub const WORKER_ENV_VAR: &str = "APIFUZZ_WORKER";

/// Compose project name prefix, salted per worker when the driver sets
/// [`WORKER_ENV_VAR`].
pub fn project_name_prefix() -> String {
    let salt = std::env::var(WORKER_ENV_VAR).unwrap_or_default();
    format!("apifuzz_{salt}")
}
