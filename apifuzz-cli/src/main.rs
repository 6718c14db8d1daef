use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use apifuzz::compose::ensure_docker_version;
use apifuzz::network::unused_port;
use apifuzz::utils::parse_headers;
use apifuzz::{
    Catalog, FuzzOptions, Fuzzer, FuzzerAdapter, HarnessError, RunOptions, SentryConfig, Target,
    TargetAdapter, TargetOptions,
};

#[derive(Debug, Parser)]
#[command(
    name = "apifuzz",
    about = "Run containerized fuzzers against containerized API targets"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a fuzzer against a target and collect the evidence
    Run(RunCommand),
    /// Run a fuzzer against an already running service
    Fuzz(FuzzCommand),
    /// Bring a target up and keep it running until interrupted
    Target(TargetCommand),
    /// List every registered target and fuzzer
    List,
}

#[derive(Debug, Args)]
struct RunCommand {
    /// Fuzz target to start, as `base[:variant]`
    target: String,
    /// Fuzzer to run, as `base[:variant]`
    fuzzer: String,
    /// Directory receiving the `fuzzer/` and `target/` evidence subtrees
    #[arg(long)]
    output_dir: PathBuf,
    /// TCP port on localhost used for the fuzz target
    #[arg(long)]
    port: Option<u16>,
    /// Force building docker images
    #[arg(long)]
    build: bool,
    /// Do not perform any cleanup on exit
    #[arg(long)]
    no_cleanup: bool,
    /// Explicit ID used to identify different runs in telemetry
    #[arg(long)]
    run_id: Option<String>,
    /// Tell the fuzzer to skip TLS certificate verification
    #[arg(long)]
    ssl_insecure: bool,
    /// Extra header in the `NAME:VALUE` format; may be repeated
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Sentry DSN handed to the fuzz target
    #[arg(long)]
    sentry_dsn: Option<String>,
    /// Sentry instance base URL
    #[arg(long)]
    sentry_url: Option<String>,
    /// Sentry access token
    #[arg(long)]
    sentry_token: Option<String>,
    /// Slug of the Sentry organization the target project belongs to
    #[arg(long)]
    sentry_organization: Option<String>,
    /// Slug of the Sentry project
    #[arg(long)]
    sentry_project: Option<String>,
}

#[derive(Debug, Args)]
struct FuzzCommand {
    /// Fuzzer to run, as `base[:variant]`
    fuzzer: String,
    /// Locator of the API schema to fuzz
    #[arg(long)]
    schema: String,
    /// Base URL of the running service
    #[arg(long)]
    base_url: String,
    /// Directory receiving the fuzzer's artifacts
    #[arg(long)]
    output_dir: PathBuf,
    /// Force building docker images
    #[arg(long)]
    build: bool,
    /// Do not perform any cleanup on exit
    #[arg(long)]
    no_cleanup: bool,
    /// Tell the fuzzer to skip TLS certificate verification
    #[arg(long)]
    ssl_insecure: bool,
    /// Extra header in the `NAME:VALUE` format; may be repeated
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
}

#[derive(Debug, Args)]
struct TargetCommand {
    /// Fuzz target to start, as `base[:variant]`
    target: String,
    /// TCP port on localhost used for the fuzz target
    #[arg(long)]
    port: Option<u16>,
    /// Force building docker images
    #[arg(long)]
    build: bool,
    /// Do not perform any cleanup on exit
    #[arg(long)]
    no_cleanup: bool,
    /// Explicit ID used to identify different runs in telemetry
    #[arg(long)]
    run_id: Option<String>,
    /// Sentry DSN handed to the fuzz target
    #[arg(long)]
    sentry_dsn: Option<String>,
}

/// Registration point for compiled-in target adapters.
///
/// Deployments register their catalog packages here; the library keeps
/// no hardcoded component list.
fn target_catalog() -> Catalog<dyn TargetAdapter> {
    Catalog::new()
}

/// Registration point for compiled-in fuzzer adapters.
fn fuzzer_catalog() -> Catalog<dyn FuzzerAdapter> {
    Catalog::new()
}

#[tokio::main]
async fn main() {
    apifuzz::init();
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(error) => {
            error!(%error, "Run failed");
            // Infrastructure failures propagate their exit code verbatim
            error.exit_code()
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32, HarnessError> {
    match cli.command {
        Command::Run(command) => {
            ensure_docker_version().await?;
            run(command).await
        }
        Command::Fuzz(command) => {
            ensure_docker_version().await?;
            fuzz(command).await
        }
        Command::Target(command) => {
            ensure_docker_version().await?;
            hold_target(command).await
        }
        Command::List => {
            for name in target_catalog().list_all() {
                println!("target: {name}");
            }
            for name in fuzzer_catalog().list_all() {
                println!("fuzzer: {name}");
            }
            Ok(0)
        }
    }
}

fn target_options(
    port: Option<u16>,
    run_id: Option<String>,
    build: bool,
    sentry_dsn: Option<String>,
) -> TargetOptions {
    let mut options = TargetOptions {
        port: port.unwrap_or_else(unused_port),
        force_build: build,
        sentry_dsn,
        ..TargetOptions::default()
    };
    if let Some(run_id) = run_id {
        options.run_id = run_id;
    }
    options
}

async fn run(command: RunCommand) -> Result<i32, HarnessError> {
    let Some(target_adapter) = target_catalog().resolve(&command.target)? else {
        error!("Target `{}` is not found", command.target);
        return Ok(2);
    };
    let Some(fuzzer_adapter) = fuzzer_catalog().resolve(&command.fuzzer)? else {
        error!("Fuzzer `{}` is not found", command.fuzzer);
        return Ok(2);
    };
    let headers = parse_headers(&command.headers)?;
    let target = Target::new(
        target_adapter,
        target_options(
            command.port,
            command.run_id,
            command.build,
            command.sentry_dsn,
        ),
    );
    let fuzzer = Fuzzer::new(fuzzer_adapter);
    apifuzz::execute(
        target,
        fuzzer,
        RunOptions {
            fuzzer_name: command.fuzzer,
            target_name: command.target,
            output_dir: command.output_dir,
            build: command.build,
            no_cleanup: command.no_cleanup,
            ssl_insecure: command.ssl_insecure,
            headers,
            sentry: SentryConfig::from_options(
                command.sentry_url,
                command.sentry_token,
                command.sentry_organization,
                command.sentry_project,
            ),
        },
    )
    .await
}

/// Fuzz a service the harness does not manage.
async fn fuzz(command: FuzzCommand) -> Result<i32, HarnessError> {
    let Some(adapter) = fuzzer_catalog().resolve(&command.fuzzer)? else {
        error!("Fuzzer `{}` is not found", command.fuzzer);
        return Ok(2);
    };
    let headers = parse_headers(&command.headers)?;
    apifuzz::execute_standalone(
        Fuzzer::new(adapter),
        FuzzOptions {
            schema: command.schema,
            base_url: command.base_url,
            output_dir: command.output_dir,
            build: command.build,
            no_cleanup: command.no_cleanup,
            ssl_insecure: command.ssl_insecure,
            headers,
        },
    )
    .await
}

/// Spin up a target and run it until manually stopped.
async fn hold_target(command: TargetCommand) -> Result<i32, HarnessError> {
    let Some(adapter) = target_catalog().resolve(&command.target)? else {
        error!("Target `{}` is not found", command.target);
        return Ok(2);
    };
    let mut target = Target::new(
        adapter,
        target_options(
            command.port,
            command.run_id,
            command.build,
            command.sentry_dsn,
        ),
    );
    let env = HashMap::new();
    let outcome = tokio::select! {
        result = target.start(&env) => result.map(|_| ()),
        _ = tokio::signal::ctrl_c() => Err(HarnessError::Interrupted),
    };
    if outcome.is_ok() {
        info!("Target is running; press Ctrl-C to stop");
        let _ = tokio::signal::ctrl_c().await;
    }
    // Interrupt or not, resources are released
    target.stop().await;
    if !command.no_cleanup {
        target.cleanup().await;
    }
    match outcome {
        Ok(()) | Err(HarnessError::Interrupted) => Ok(0),
        Err(error) => Err(error),
    }
}
