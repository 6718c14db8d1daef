//! Target lifecycle: bring an opaque containerized service up and decide
//! when it is safe to fuzz it.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::artifacts::Artifact;
use crate::compose::{ComposeRuntime, DockerCompose};
use crate::constants::{
    project_name_prefix, DEFAULT_COMPOSE_FILENAME, LOG_POLL_INTERVAL_MS, WAIT_TARGET_READY_TIMEOUT,
};
use crate::errors::HarnessError;
use crate::metadata::TargetMetadata;
use crate::network::{self, unused_port, ProbeConfig};
use crate::sentry::{self, SentryConfig};

/// Per-target boundary implemented by catalog adapters.
///
/// An adapter describes one target service: where its compose file
/// lives, how its URLs are derived from the allocated port, and how to
/// recognize from a single log line that the service is usable.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Catalog package name of the target.
    fn name(&self) -> &str;

    /// Directory containing the target's compose file.
    fn path(&self) -> PathBuf;

    /// Target base URL for the allocated port.
    fn base_url(&self, port: u16) -> String;

    /// Full locator of the target's API schema.
    fn schema_location(&self, port: u16) -> String;

    /// Whether this log line marks the service as ready.
    fn is_ready(&self, line: &str) -> bool;

    /// Descriptive metadata about the target.
    fn metadata(&self) -> TargetMetadata;

    fn compose_filename(&self) -> String {
        DEFAULT_COMPOSE_FILENAME.to_string()
    }

    /// Extra environment variables for the target's containers.
    fn environment(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Extract header hints from one log line, e.g. an auth token the
    /// service prints at boot.
    fn extract_headers(&self, _line: &str) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Additional actions after the target is ready, e.g. creating a
    /// user and exchanging credentials via the target's own API. May
    /// mutate the header map. Runs exactly once, without retries.
    async fn after_start(
        &self,
        _logs: &str,
        _headers: &mut HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// Lifecycle states of a managed target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    Created,
    Launching,
    AwaitingNetwork,
    AwaitingReadinessSignal,
    Ready,
    Stopping,
    CleanedUp,
    Failed,
}

/// Startup knobs for one target instance.
#[derive(Clone, Debug)]
pub struct TargetOptions {
    /// Host port the target is published on.
    pub port: u16,
    /// Identifier correlating this run's telemetry events.
    pub run_id: String,
    /// Force rebuilding the target's images.
    pub force_build: bool,
    /// Wall-clock budget for the whole startup sequence.
    pub ready_timeout: Duration,
    /// Availability probe settings.
    pub probe: ProbeConfig,
    /// DSN handed to the target so it reports errors to Sentry.
    pub sentry_dsn: Option<String>,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            port: unused_port(),
            run_id: chrono::Utc::now().timestamp().to_string(),
            force_build: false,
            ready_timeout: Duration::from_secs(WAIT_TARGET_READY_TIMEOUT),
            probe: ProbeConfig::default(),
            sentry_dsn: None,
        }
    }
}

/// Immutable result of a successful start.
#[derive(Clone, Debug)]
pub struct TargetContext {
    pub base_url: String,
    pub schema_location: String,
    /// Headers scraped from logs or produced by the post-start hook.
    pub headers: HashMap<String, String>,
}

/// A target instance owned by the harness.
pub struct Target {
    adapter: Arc<dyn TargetAdapter>,
    runtime: Arc<dyn ComposeRuntime>,
    options: TargetOptions,
    state: TargetState,
}

impl Target {
    /// Create a target backed by docker-compose in the adapter's directory.
    pub fn new(adapter: Arc<dyn TargetAdapter>, options: TargetOptions) -> Self {
        let project = format!("{}{}", project_name_prefix(), adapter.name());
        let runtime = Arc::new(DockerCompose::new(
            adapter.path(),
            project,
            Some(adapter.compose_filename()),
        ));
        Self::with_runtime(adapter, runtime, options)
    }

    /// Create a target on an explicit runtime; tests substitute a stub here.
    pub fn with_runtime(
        adapter: Arc<dyn TargetAdapter>,
        runtime: Arc<dyn ComposeRuntime>,
        options: TargetOptions,
    ) -> Self {
        Self {
            adapter,
            runtime,
            options,
            state: TargetState::Created,
        }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn run_id(&self) -> &str {
        &self.options.run_id
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    pub fn metadata(&self) -> TargetMetadata {
        self.adapter.metadata()
    }

    fn environment(&self, extra: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = self.adapter.environment();
        env.insert("PORT".to_string(), self.options.port.to_string());
        env.insert("APIFUZZ_RUN_ID".to_string(), self.options.run_id.clone());
        if let Ok(dsn) = std::env::var("SENTRY_DSN") {
            env.insert("SENTRY_DSN".to_string(), dsn);
        }
        if let Some(dsn) = &self.options.sentry_dsn {
            env.insert("SENTRY_DSN".to_string(), dsn.clone());
        }
        env.extend(extra.clone());
        env
    }

    fn fail<T>(&mut self, error: HarnessError) -> Result<T, HarnessError> {
        self.state = TargetState::Failed;
        Err(error)
    }

    /// Start the target and block until it is ready to serve requests.
    pub async fn start(
        &mut self,
        extra_env: &HashMap<String, String>,
    ) -> Result<TargetContext, HarnessError> {
        info!(target = %self.name(), run_id = %self.options.run_id, "Start target");
        let started = Instant::now();
        let deadline = started + self.options.ready_timeout;

        self.state = TargetState::Launching;
        let env = self.environment(extra_env);
        if let Err(error) = self
            .runtime
            .up(
                Some(self.options.ready_timeout),
                self.options.force_build,
                &[],
                &env,
            )
            .await
        {
            return self.fail(error);
        }

        self.state = TargetState::AwaitingNetwork;
        let base_url = self.adapter.base_url(self.options.port);
        if let Err(error) = network::wait_until_available(&base_url, &self.options.probe).await {
            return self.fail(error);
        }

        self.state = TargetState::AwaitingReadinessSignal;
        let mut headers = HashMap::new();
        // Lines from multiple services are not chronologically ordered, so
        // every snapshot is deduplicated against lines already seen. The
        // comparison is exact byte equality: a target that legitimately
        // repeats an identical line is observed only once.
        let mut seen: HashSet<String> = HashSet::new();
        let mut ready = false;
        'poll: loop {
            let logs = match self.runtime.logs().await {
                Ok(logs) => logs,
                Err(error) => return self.fail(error),
            };
            for line in String::from_utf8_lossy(&logs).lines() {
                if !seen.insert(line.to_string()) {
                    continue;
                }
                headers.extend(self.adapter.extract_headers(line));
                if self.adapter.is_ready(line) {
                    ready = true;
                    break 'poll;
                }
            }
            // A slow fetch eats into the budget itself, so the deadline is
            // checked again after processing, not only before
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(LOG_POLL_INTERVAL_MS)).await;
        }
        if !ready {
            let logs = self.current_logs().await;
            error!(
                target = %self.name(),
                timeout = self.options.ready_timeout.as_secs(),
                logs = %logs,
                "Target is not ready in time"
            );
            return self.fail(HarnessError::NotReady { logs });
        }

        let logs = self.current_logs().await;
        if let Err(error) = self.adapter.after_start(&logs, &mut headers).await {
            return self.fail(error);
        }

        self.state = TargetState::Ready;
        let schema_location = self.adapter.schema_location(self.options.port);
        info!(
            target = %self.name(),
            duration = started.elapsed().as_secs_f64(),
            address = %base_url,
            schema = %schema_location,
            headers = headers.len(),
            "Target is ready"
        );
        Ok(TargetContext {
            base_url,
            schema_location,
            headers,
        })
    }

    async fn current_logs(&self) -> String {
        self.runtime
            .logs()
            .await
            .map(|logs| String::from_utf8_lossy(&logs).into_owned())
            .unwrap_or_default()
    }

    /// Stop the target's containers. Failures are logged, not raised.
    pub async fn stop(&mut self) {
        info!(target = %self.name(), "Stop target");
        self.state = TargetState::Stopping;
        if let Err(error) = self.runtime.stop().await {
            error!(target = %self.name(), %error, "Failed to stop target");
        }
    }

    /// Remove the target's containers, volumes and default network.
    ///
    /// Idempotent and safe to call after a failed start.
    pub async fn cleanup(&mut self) {
        info!(target = %self.name(), "Clean up");
        if let Err(error) = self.runtime.rm().await {
            error!(target = %self.name(), %error, "Failed to remove target containers");
        }
        match self.runtime.remove_network().await {
            Ok(output) if !output.is_success() => {
                // Already gone on repeated cleanup
                warn!(
                    target = %self.name(),
                    stdout = %String::from_utf8_lossy(&output.stdout),
                    "Could not remove project network"
                );
            }
            Ok(_) => {}
            Err(error) => {
                error!(target = %self.name(), %error, "Failed to remove project network");
            }
        }
        self.state = TargetState::CleanedUp;
    }

    /// Extract useful artifacts from the target side of a run.
    ///
    /// Always includes the service logs; optionally includes telemetry
    /// events for this run. Telemetry failures downgrade to "no
    /// telemetry artifacts" rather than aborting.
    pub async fn collect_artifacts(
        &self,
        sentry: Option<&SentryConfig>,
    ) -> Result<Vec<Artifact>, HarnessError> {
        let mut artifacts = vec![Artifact::stdout(self.runtime.logs().await?)];
        if let Some(config) = sentry {
            match sentry::list_events(config, &self.options.run_id).await {
                Ok(events) => artifacts.extend(events.into_iter().map(Artifact::sentry_event)),
                Err(error) => {
                    warn!(target = %self.name(), %error, "Failed to collect telemetry events");
                }
            }
        }
        Ok(artifacts)
    }
}
