//! End-to-end orchestration of one (target, fuzzer) run.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::info;

use crate::artifacts;
use crate::errors::HarnessError;
use crate::fuzzer::Fuzzer;
use crate::metadata::RunMetadata;
use crate::sentry::SentryConfig;
use crate::target::Target;

/// Inputs for one orchestrated run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Qualified name the fuzzer was resolved from.
    pub fuzzer_name: String,
    /// Qualified name the target was resolved from.
    pub target_name: String,
    /// Root of the output tree (`fuzzer/`, `target/`, `metadata.json`).
    pub output_dir: PathBuf,
    /// Force rebuilding the fuzzer's images.
    pub build: bool,
    /// Skip resource cleanup on exit.
    pub no_cleanup: bool,
    /// Tell the tool to skip TLS verification.
    pub ssl_insecure: bool,
    /// Extra headers for every request, on top of headers the target
    /// itself provided.
    pub headers: HashMap<String, String>,
    /// Telemetry credentials; `None` disables event collection.
    pub sentry: Option<SentryConfig>,
}

/// Run a fuzzer against a target and harvest the evidence.
///
/// Stop and cleanup run on every exit path: normal completion, any
/// failure, and operator interrupt. Returns the fuzzing tool's exit
/// code; infrastructure failures surface as errors carrying their own
/// code.
pub async fn execute(
    mut target: Target,
    fuzzer: Fuzzer,
    options: RunOptions,
) -> Result<i32, HarnessError> {
    let run_id = target.run_id().to_string();
    let outcome = tokio::select! {
        result = fuzz_one(&mut target, &fuzzer, &options) => result,
        _ = tokio::signal::ctrl_c() => Err(HarnessError::Interrupted),
    };
    // Resources are released before any error surfaces
    target.stop().await;
    fuzzer.stop().await;
    if !options.no_cleanup {
        target.cleanup().await;
        fuzzer.cleanup().await;
    }
    let (exit_code, duration) = outcome?;
    RunMetadata {
        fuzzer: options.fuzzer_name.clone(),
        target: options.target_name.clone(),
        run_id: run_id.clone(),
        duration,
    }
    .store(&options.output_dir)?;
    info!(
        fuzzer = %options.fuzzer_name,
        target = %options.target_name,
        run_id = %run_id,
        exit_code,
        duration,
        "Run finished"
    );
    Ok(exit_code)
}

/// Inputs for a standalone fuzzer invocation.
#[derive(Clone, Debug)]
pub struct FuzzOptions {
    /// Locator of the API schema to fuzz.
    pub schema: String,
    /// Base URL of the already running service.
    pub base_url: String,
    /// Directory receiving the fuzzer's artifacts.
    pub output_dir: PathBuf,
    /// Force rebuilding the fuzzer's images.
    pub build: bool,
    /// Skip resource cleanup on exit.
    pub no_cleanup: bool,
    /// Tell the tool to skip TLS verification.
    pub ssl_insecure: bool,
    /// Extra headers for every request.
    pub headers: HashMap<String, String>,
}

/// Run a fuzzer against a service the harness does not manage.
///
/// No target lifecycle is involved; the caller vouches that something
/// is serving `base_url`. Stop and cleanup still run on every exit
/// path, and the tool's exit code is returned verbatim.
pub async fn execute_standalone(
    fuzzer: Fuzzer,
    options: FuzzOptions,
) -> Result<i32, HarnessError> {
    let outcome = tokio::select! {
        result = fuzz_standalone(&fuzzer, &options) => result,
        _ = tokio::signal::ctrl_c() => Err(HarnessError::Interrupted),
    };
    fuzzer.stop().await;
    if !options.no_cleanup {
        fuzzer.cleanup().await;
    }
    let (exit_code, duration) = outcome?;
    info!(
        fuzzer = %fuzzer.name(),
        exit_code,
        duration,
        "Standalone fuzzing finished"
    );
    Ok(exit_code)
}

async fn fuzz_standalone(
    fuzzer: &Fuzzer,
    options: &FuzzOptions,
) -> Result<(i32, f64), HarnessError> {
    let result = fuzzer
        .run(
            &options.schema,
            &options.base_url,
            &options.headers,
            options.ssl_insecure,
            options.build,
            None,
        )
        .await?;
    std::fs::create_dir_all(&options.output_dir)?;
    artifacts::persist(&result.collect_artifacts()?, &options.output_dir)?;
    Ok((result.exit_code(), result.duration))
}

async fn fuzz_one(
    target: &mut Target,
    fuzzer: &Fuzzer,
    options: &RunOptions,
) -> Result<(i32, f64), HarnessError> {
    let extra_env = HashMap::from([(
        "APIFUZZ_FUZZER_ID".to_string(),
        options.fuzzer_name.clone(),
    )]);
    let context = target.start(&extra_env).await?;

    // Caller-supplied headers take precedence over scraped ones
    let mut headers = context.headers.clone();
    headers.extend(options.headers.clone());

    let result = fuzzer
        .run(
            &context.schema_location,
            &context.base_url,
            &headers,
            options.ssl_insecure,
            options.build,
            Some(options.target_name.clone()),
        )
        .await?;

    std::fs::create_dir_all(&options.output_dir)?;
    artifacts::persist(
        &result.collect_artifacts()?,
        &options.output_dir.join("fuzzer"),
    )?;
    let target_artifacts = target.collect_artifacts(options.sentry.as_ref()).await?;
    artifacts::persist(&target_artifacts, &options.output_dir.join("target"))?;

    Ok((result.exit_code(), result.duration))
}
