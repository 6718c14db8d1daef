//! Capability surface over docker-compose.
//!
//! The harness never talks to the container runtime directly; everything
//! goes through [`ComposeRuntime`] so that lifecycles can be exercised
//! against a stub in tests. The production implementation shells out to
//! `docker-compose` with an isolated project name per component.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::error;

use crate::constants::{DEFAULT_COMPOSE_FILENAME, MINIMUM_COMPOSE_VERSION, MINIMUM_DOCKER_VERSION};
use crate::errors::HarnessError;

/// Outcome of a finished runtime command.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    /// Process exit code.
    pub code: i32,
    /// Combined stdout/stderr of the command.
    pub stdout: Vec<u8>,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Operations the harness needs from the container runtime.
///
/// All operations return an error on non-zero exit except [`run`], which
/// always hands back the command's outcome: a failing fuzzing tool is a
/// legitimate result, not an infrastructure failure.
///
/// [`run`]: ComposeRuntime::run
#[async_trait]
pub trait ComposeRuntime: Send + Sync {
    /// Build / create / start containers for the component's services.
    async fn up(
        &self,
        timeout: Option<Duration>,
        build: bool,
        services: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, HarnessError>;

    /// Run a single one-off command on a service.
    async fn run(
        &self,
        service: &str,
        args: &[String],
        entrypoint: Option<&str>,
        volumes: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, HarnessError>;

    /// Force a rebuild of the component's images.
    async fn build(&self, env: &HashMap<String, String>) -> Result<CommandOutput, HarnessError>;

    /// Get all log output available at the moment, across all services.
    async fn logs(&self) -> Result<Vec<u8>, HarnessError>;

    /// Stop the component's containers.
    async fn stop(&self) -> Result<CommandOutput, HarnessError>;

    /// Remove containers and anonymous volumes.
    async fn rm(&self) -> Result<CommandOutput, HarnessError>;

    /// Remove the network implicitly created for the project.
    async fn remove_network(&self) -> Result<CommandOutput, HarnessError>;
}

/// `docker-compose` driven from a subprocess.
#[derive(Clone, Debug)]
pub struct DockerCompose {
    /// Directory containing the compose file.
    path: PathBuf,
    /// Project name; prefixed to avoid clashing with unrelated projects.
    project: String,
    /// Compose file name within `path`.
    file: String,
}

impl DockerCompose {
    pub fn new(path: PathBuf, project: String, file: Option<String>) -> Self {
        Self {
            path,
            project,
            file: file.unwrap_or_else(|| DEFAULT_COMPOSE_FILENAME.to_string()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    async fn compose(
        &self,
        args: &[&str],
        timeout: Option<Duration>,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, HarnessError> {
        let mut command = Command::new("docker-compose");
        command
            .arg("-f")
            .arg(&self.file)
            .arg("-p")
            .arg(&self.project)
            .args(args)
            .current_dir(&self.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(env);
        // When `-p` is passed, docker-compose fails to find `git` during
        // builds without PATH.
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }
        execute(command, &format!("docker-compose {}", args.join(" ")), timeout).await
    }

    fn checked<'a>(
        &'a self,
        message: &'a str,
    ) -> impl Fn(CommandOutput) -> Result<CommandOutput, HarnessError> + 'a {
        move |output| {
            if output.is_success() {
                Ok(output)
            } else {
                error!(
                    project = %self.project,
                    code = output.code,
                    stdout = %String::from_utf8_lossy(&output.stdout),
                    "{message}"
                );
                Err(HarnessError::Infrastructure {
                    command: message.to_string(),
                    code: output.code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                })
            }
        }
    }
}

#[async_trait]
impl ComposeRuntime for DockerCompose {
    async fn up(
        &self,
        timeout: Option<Duration>,
        build: bool,
        services: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, HarnessError> {
        let mut args = vec![
            "up",
            "--no-color",
            // Besides better isolation, docker-compose won't expect the
            // user's input if a relevant image was manually removed
            "--renew-anon-volumes",
            "-d",
        ];
        if build {
            args.push("--build");
        }
        for service in services {
            args.push(service);
        }
        self.compose(&args, timeout, env)
            .await
            .and_then(self.checked("Failed to execute `docker-compose up`"))
    }

    async fn run(
        &self,
        service: &str,
        args: &[String],
        entrypoint: Option<&str>,
        volumes: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, HarnessError> {
        let mut command = vec!["run"];
        if let Some(entrypoint) = entrypoint {
            command.extend(["--entrypoint", entrypoint]);
        }
        for volume in volumes {
            command.extend(["-v", volume]);
        }
        command.push(service);
        command.extend(args.iter().map(String::as_str));
        // Non-zero exits are returned to the caller, not raised
        self.compose(&command, None, env).await
    }

    async fn build(&self, env: &HashMap<String, String>) -> Result<CommandOutput, HarnessError> {
        self.compose(&["build"], None, env)
            .await
            .and_then(self.checked("Failed to execute `docker-compose build`"))
    }

    async fn logs(&self) -> Result<Vec<u8>, HarnessError> {
        self.compose(&["logs", "--no-color", "--timestamps"], None, &HashMap::new())
            .await
            .and_then(self.checked("Failed to get docker-compose logs"))
            .map(|output| output.stdout)
    }

    async fn stop(&self) -> Result<CommandOutput, HarnessError> {
        self.compose(&["stop"], None, &HashMap::new())
            .await
            .and_then(self.checked("Failed to stop docker-compose"))
    }

    async fn rm(&self) -> Result<CommandOutput, HarnessError> {
        self.compose(&["rm", "--force", "--stop", "-v"], None, &HashMap::new())
            .await
            .and_then(self.checked("Failed to remove stopped containers"))
    }

    async fn remove_network(&self) -> Result<CommandOutput, HarnessError> {
        // There could be other networks, but only the default one is
        // created implicitly for every project
        let network = format!("{}_default", self.project);
        docker(&["network", "rm", &network]).await
    }
}

/// Run the docker CLI in a subprocess.
pub async fn docker(args: &[&str]) -> Result<CommandOutput, HarnessError> {
    let mut command = Command::new("docker");
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    execute(command, &format!("docker {}", args.join(" ")), None).await
}

async fn execute(
    mut command: Command,
    description: &str,
    timeout: Option<Duration>,
) -> Result<CommandOutput, HarnessError> {
    command.kill_on_drop(true);
    let future = command.output();
    let output = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| HarnessError::Infrastructure {
                command: description.to_string(),
                code: 124,
                stdout: format!("`{description}` timed out after {}s", timeout.as_secs()),
            })?,
        None => future.await,
    }?;
    let mut stdout = output.stdout;
    stdout.extend_from_slice(&output.stderr);
    Ok(CommandOutput {
        code: output.status.code().unwrap_or(-1),
        stdout,
    })
}

/// Ensure the host satisfies the minimally required versions of Docker
/// and docker-compose.
pub async fn ensure_docker_version() -> Result<(), HarnessError> {
    let compose_version = compose_version().await?;
    check_version("Docker-compose", &compose_version, MINIMUM_COMPOSE_VERSION)?;
    let docker_version = docker_version().await?;
    check_version("Docker", &docker_version, MINIMUM_DOCKER_VERSION)?;
    Ok(())
}

async fn docker_version() -> Result<String, HarnessError> {
    let output = docker(&["version", "--format", "{{json .Client.Version }}"]).await?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .trim()
        .trim_matches('"')
        .to_string())
}

async fn compose_version() -> Result<String, HarnessError> {
    let mut command = Command::new("docker-compose");
    command
        .args(["version", "--short"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    let output = execute(command, "docker-compose version", None).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn check_version(
    tool: &str,
    installed: &str,
    minimum: (u64, u64, u64),
) -> Result<(), HarnessError> {
    let unsupported = || HarnessError::UnsupportedVersion {
        tool: tool.to_string(),
        installed: installed.to_string(),
        minimum: format!("{}.{}.{}", minimum.0, minimum.1, minimum.2),
    };
    let parsed = parse_version(installed).ok_or_else(unsupported)?;
    if parsed < minimum {
        return Err(unsupported());
    }
    Ok(())
}

/// Parse a dotted version string into a comparable triple.
///
/// Missing components default to zero, trailing non-numeric suffixes
/// (`-rc1` and the like) are ignored.
fn parse_version(value: &str) -> Option<(u64, u64, u64)> {
    let mut parts = value.trim().trim_start_matches('v').splitn(3, '.');
    let mut component = |required: bool| -> Option<u64> {
        match parts.next() {
            Some(part) => {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                if digits.is_empty() {
                    if required {
                        None
                    } else {
                        Some(0)
                    }
                } else {
                    digits.parse().ok()
                }
            }
            None if required => None,
            None => Some(0),
        }
    };
    Some((component(true)?, component(false)?, component(false)?))
}
