//! Fuzzer lifecycle: prepare input for a containerized fuzzing tool,
//! execute it as a one-off command, and expose a structured result.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::{error, info};

use crate::artifacts::Artifact;
use crate::compose::{CommandOutput, ComposeRuntime, DockerCompose};
use crate::constants::{
    project_name_prefix, DEFAULT_COMPOSE_FILENAME, DEFAULT_FUZZER_SERVICE_NAME,
    TEMPORARY_DIRECTORY_PREFIX,
};
use crate::errors::HarnessError;
use crate::network::unused_port;
use crate::utils::is_url;

/// Compose service used by the static-file-server schema fallback.
const STATIC_SERVER_SERVICE: &str = "static";

/// How a fuzzing tool consumes its API schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaStrategy {
    /// Copy local schema files into the shared input directory and hand
    /// the tool the in-container path. URLs pass through untouched.
    CopyToInput,
    /// The tool cannot read local files at all: serve the input
    /// directory over HTTP and hand the tool a URL.
    ServeHttp,
}

/// Per-tool boundary implemented by catalog adapters.
pub trait FuzzerAdapter: Send + Sync {
    /// Catalog package name of the fuzzer.
    fn name(&self) -> &str;

    /// Directory containing the fuzzer's compose file.
    fn path(&self) -> PathBuf;

    /// Arguments to the tool's entrypoint in `docker-compose run <service> <args>`.
    fn entrypoint_args(
        &self,
        context: &FuzzerContext,
        schema: &str,
        base_url: &str,
        headers: &HashMap<String, String>,
        ssl_insecure: bool,
    ) -> Vec<String>;

    /// Override for the service's default entrypoint binary.
    fn entrypoint(&self) -> Option<String> {
        None
    }

    fn service_name(&self) -> String {
        DEFAULT_FUZZER_SERVICE_NAME.to_string()
    }

    fn schema_strategy(&self) -> SchemaStrategy {
        SchemaStrategy::CopyToInput
    }

    fn compose_filename(&self) -> String {
        DEFAULT_COMPOSE_FILENAME.to_string()
    }

    /// Where the shared input directory is mounted inside the container.
    fn container_input_directory(&self) -> PathBuf {
        PathBuf::from("/tmp/apifuzz/input")
    }

    /// Where the shared output directory is mounted inside the container.
    fn container_output_directory(&self) -> PathBuf {
        PathBuf::from("/tmp/apifuzz/output")
    }
}

/// Scratch space shared with the fuzzer's container for one run.
///
/// The backing temporary directory is owned here and released exactly
/// once when the context is dropped, success or not.
#[derive(Debug)]
pub struct FuzzerContext {
    scratch: TempDir,
    pub input_directory: PathBuf,
    pub output_directory: PathBuf,
    /// Name of the target under fuzz, for tools that need it.
    pub target: Option<String>,
}

impl FuzzerContext {
    fn new(prefix: &str, target: Option<String>) -> Result<Self, HarnessError> {
        let scratch = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let input_directory = scratch.path().join("input");
        let output_directory = scratch.path().join("output");
        for directory in [&input_directory, &output_directory] {
            std::fs::create_dir(directory)?;
            // The container's user must be able to read and write here
            std::fs::set_permissions(directory, std::fs::Permissions::from_mode(0o777))?;
        }
        Ok(Self {
            scratch,
            input_directory,
            output_directory,
            target,
        })
    }

    /// Root of the per-run scratch space.
    pub fn path(&self) -> &Path {
        self.scratch.path()
    }
}

/// Result of one fuzz invocation.
///
/// A non-zero exit is a legitimate fuzzing outcome and is carried here,
/// never raised; interpreting the code is tool-specific and left to the
/// caller.
#[derive(Debug)]
pub struct FuzzResult {
    /// Exit status and captured stdout of the one-off command.
    pub output: CommandOutput,
    /// Scratch directories to harvest further artifacts from.
    pub context: FuzzerContext,
    /// Wall-clock fuzzing duration in seconds.
    pub duration: f64,
}

impl FuzzResult {
    pub fn exit_code(&self) -> i32 {
        self.output.code
    }

    /// Extract this run's artifacts: captured stdout plus everything the
    /// tool left in its output directory.
    pub fn collect_artifacts(&self) -> Result<Vec<Artifact>, HarnessError> {
        let mut artifacts = vec![Artifact::stdout(self.output.stdout.clone())];
        for entry in std::fs::read_dir(&self.context.output_directory)? {
            artifacts.push(Artifact::log_file(entry?.path()));
        }
        Ok(artifacts)
    }
}

/// A fuzzing tool instance owned by the harness.
pub struct Fuzzer {
    adapter: Arc<dyn FuzzerAdapter>,
    runtime: Arc<dyn ComposeRuntime>,
}

impl Fuzzer {
    /// Create a fuzzer backed by docker-compose in the adapter's directory.
    pub fn new(adapter: Arc<dyn FuzzerAdapter>) -> Self {
        let project = format!("{}{}", project_name_prefix(), adapter.name());
        let runtime = Arc::new(DockerCompose::new(
            adapter.path(),
            project,
            Some(adapter.compose_filename()),
        ));
        Self::with_runtime(adapter, runtime)
    }

    /// Create a fuzzer on an explicit runtime; tests substitute a stub here.
    pub fn with_runtime(adapter: Arc<dyn FuzzerAdapter>, runtime: Arc<dyn ComposeRuntime>) -> Self {
        Self { adapter, runtime }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    /// Run the tool against an API schema.
    pub async fn run(
        &self,
        schema: &str,
        base_url: &str,
        headers: &HashMap<String, String>,
        ssl_insecure: bool,
        build: bool,
        target: Option<String>,
    ) -> Result<FuzzResult, HarnessError> {
        if build {
            self.runtime.build(&HashMap::new()).await?;
        }
        let prefix = format!("{}{}-", TEMPORARY_DIRECTORY_PREFIX, self.name());
        let context = FuzzerContext::new(&prefix, target)?;
        let schema_location = self.prepare_schema(&context, schema).await?;
        info!(
            fuzzer = %self.name(),
            schema = %schema_location,
            base_url = %base_url,
            headers = headers.len(),
            "Start fuzzer"
        );
        let args =
            self.adapter
                .entrypoint_args(&context, &schema_location, base_url, headers, ssl_insecure);
        let entrypoint = self.adapter.entrypoint();
        let started = Instant::now();
        let output = self
            .runtime
            .run(
                &self.adapter.service_name(),
                &args,
                entrypoint.as_deref(),
                &self.volumes(&context),
                &HashMap::new(),
            )
            .await?;
        let duration = started.elapsed().as_secs_f64();
        info!(
            fuzzer = %self.name(),
            returncode = output.code,
            duration,
            "Finish fuzzer"
        );
        Ok(FuzzResult {
            output,
            context,
            duration,
        })
    }

    /// Make the API schema accessible to the tool's container.
    async fn prepare_schema(
        &self,
        context: &FuzzerContext,
        schema: &str,
    ) -> Result<String, HarnessError> {
        if is_url(schema) {
            // Containers run with host networking, so localhost URLs resolve
            return Ok(schema.to_string());
        }
        let file_name = copy_to_input(schema, &context.input_directory)?;
        match self.adapter.schema_strategy() {
            SchemaStrategy::CopyToInput => Ok(self
                .adapter
                .container_input_directory()
                .join(file_name)
                .display()
                .to_string()),
            SchemaStrategy::ServeHttp => self.serve_schema(context, &file_name).await,
        }
    }

    /// Serve the input directory over HTTP for tools that cannot read
    /// local files. The auxiliary service is reclaimed by `cleanup`.
    async fn serve_schema(
        &self,
        context: &FuzzerContext,
        file_name: &str,
    ) -> Result<String, HarnessError> {
        let port = unused_port();
        let env = HashMap::from([
            (
                "SERVE_INDEX".to_string(),
                context.input_directory.display().to_string(),
            ),
            ("PORT".to_string(), port.to_string()),
        ]);
        self.runtime
            .up(None, false, &[STATIC_SERVER_SERVICE.to_string()], &env)
            .await?;
        Ok(format!("http://0.0.0.0:{port}/{file_name}"))
    }

    fn volumes(&self, context: &FuzzerContext) -> Vec<String> {
        vec![
            // Everything consumed by the container
            format!(
                "{}:{}:Z",
                context.input_directory.display(),
                self.adapter.container_input_directory().display()
            ),
            // All output of the container
            format!(
                "{}:{}:Z",
                context.output_directory.display(),
                self.adapter.container_output_directory().display()
            ),
        ]
    }

    /// Stop the fuzzer's services. Failures are logged, not raised.
    pub async fn stop(&self) {
        if let Err(error) = self.runtime.stop().await {
            error!(fuzzer = %self.name(), %error, "Failed to stop fuzzer services");
        }
    }

    /// Remove the fuzzer's containers, including any auxiliary schema
    /// server. Safe to call when nothing was started.
    pub async fn cleanup(&self) {
        if let Err(error) = self.runtime.rm().await {
            error!(fuzzer = %self.name(), %error, "Failed to remove fuzzer containers");
        }
    }
}

fn copy_to_input(schema: &str, input_directory: &Path) -> Result<String, HarnessError> {
    let source = Path::new(schema);
    let file_name = source
        .file_name()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("schema path has no file name: {schema}"),
            )
        })?
        .to_string_lossy()
        .into_owned();
    std::fs::copy(source, input_directory.join(&file_name))?;
    Ok(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoAdapter;

    impl FuzzerAdapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }

        fn path(&self) -> PathBuf {
            PathBuf::from(".")
        }

        fn entrypoint_args(
            &self,
            _context: &FuzzerContext,
            schema: &str,
            base_url: &str,
            _headers: &HashMap<String, String>,
            _ssl_insecure: bool,
        ) -> Vec<String> {
            vec![schema.to_string(), base_url.to_string()]
        }
    }

    struct NoopRuntime;

    #[async_trait]
    impl ComposeRuntime for NoopRuntime {
        async fn up(
            &self,
            _timeout: Option<Duration>,
            _build: bool,
            _services: &[String],
            _env: &HashMap<String, String>,
        ) -> Result<CommandOutput, HarnessError> {
            Ok(CommandOutput {
                code: 0,
                stdout: Vec::new(),
            })
        }

        async fn run(
            &self,
            _service: &str,
            args: &[String],
            _entrypoint: Option<&str>,
            _volumes: &[String],
            _env: &HashMap<String, String>,
        ) -> Result<CommandOutput, HarnessError> {
            Ok(CommandOutput {
                code: 0,
                stdout: args.join(" ").into_bytes(),
            })
        }

        async fn build(&self, _env: &HashMap<String, String>) -> Result<CommandOutput, HarnessError> {
            Ok(CommandOutput {
                code: 0,
                stdout: Vec::new(),
            })
        }

        async fn logs(&self) -> Result<Vec<u8>, HarnessError> {
            Ok(Vec::new())
        }

        async fn stop(&self) -> Result<CommandOutput, HarnessError> {
            Ok(CommandOutput {
                code: 0,
                stdout: Vec::new(),
            })
        }

        async fn rm(&self) -> Result<CommandOutput, HarnessError> {
            Ok(CommandOutput {
                code: 0,
                stdout: Vec::new(),
            })
        }

        async fn remove_network(&self) -> Result<CommandOutput, HarnessError> {
            Ok(CommandOutput {
                code: 0,
                stdout: Vec::new(),
            })
        }
    }

    fn fuzzer() -> Fuzzer {
        Fuzzer::with_runtime(Arc::new(EchoAdapter), Arc::new(NoopRuntime))
    }

    #[tokio::test]
    async fn test_prepare_schema_url_passthrough() {
        let fuzzer = fuzzer();
        let context = FuzzerContext::new("apifuzz-test-", None).unwrap();
        let schema = "http://0.0.0.0:8080/schema.yaml";
        let prepared = fuzzer.prepare_schema(&context, schema).await.unwrap();
        assert_eq!(prepared, schema);
    }

    #[tokio::test]
    async fn test_prepare_schema_copies_local_file() {
        let fuzzer = fuzzer();
        let context = FuzzerContext::new("apifuzz-test-", None).unwrap();
        let source = tempfile::tempdir().unwrap();
        let schema = source.path().join("schema.yaml");
        std::fs::write(&schema, "openapi: 3.0.0\n").unwrap();

        let prepared = fuzzer
            .prepare_schema(&context, schema.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(prepared, "/tmp/apifuzz/input/schema.yaml");
        assert!(context.input_directory.join("schema.yaml").is_file());
    }

    #[test]
    fn test_context_directories_are_world_writable() {
        let context = FuzzerContext::new("apifuzz-test-", None).unwrap();
        for directory in [&context.input_directory, &context.output_directory] {
            let mode = std::fs::metadata(directory).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
        }
    }

    #[tokio::test]
    async fn test_run_returns_tool_exit_code() {
        struct FailingRuntime;

        #[async_trait]
        impl ComposeRuntime for FailingRuntime {
            async fn up(
                &self,
                _timeout: Option<Duration>,
                _build: bool,
                _services: &[String],
                _env: &HashMap<String, String>,
            ) -> Result<CommandOutput, HarnessError> {
                unreachable!()
            }

            async fn run(
                &self,
                _service: &str,
                _args: &[String],
                _entrypoint: Option<&str>,
                _volumes: &[String],
                _env: &HashMap<String, String>,
            ) -> Result<CommandOutput, HarnessError> {
                Ok(CommandOutput {
                    code: 3,
                    stdout: b"1 failure found".to_vec(),
                })
            }

            async fn build(
                &self,
                _env: &HashMap<String, String>,
            ) -> Result<CommandOutput, HarnessError> {
                unreachable!()
            }

            async fn logs(&self) -> Result<Vec<u8>, HarnessError> {
                unreachable!()
            }

            async fn stop(&self) -> Result<CommandOutput, HarnessError> {
                unreachable!()
            }

            async fn rm(&self) -> Result<CommandOutput, HarnessError> {
                unreachable!()
            }

            async fn remove_network(&self) -> Result<CommandOutput, HarnessError> {
                unreachable!()
            }
        }

        let fuzzer = Fuzzer::with_runtime(Arc::new(EchoAdapter), Arc::new(FailingRuntime));
        let result = fuzzer
            .run(
                "http://0.0.0.0:8080/schema.yaml",
                "http://0.0.0.0:8080/",
                &HashMap::new(),
                false,
                false,
                None,
            )
            .await
            .unwrap();
        // A failing tool is a result, not an error
        assert_eq!(result.exit_code(), 3);
        assert_eq!(result.output.stdout, b"1 failure found");
    }
}

