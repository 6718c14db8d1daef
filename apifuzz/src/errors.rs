use thiserror::Error;

/// Error types for harness operations.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A bare component name matched more than one registered variant.
    #[error(
        "`{name}` defines multiple variants, and it is not clear which one to load. \
         You need to specify a fully qualified name. Variants: {}",
        .candidates.join(", ")
    )]
    AmbiguousName {
        name: String,
        candidates: Vec<String>,
    },

    /// The target's base URL never accepted a TCP connection.
    #[error("{url} is not accessible")]
    NotAccessible { url: String },

    /// The target did not emit its readiness signal before the deadline.
    #[error("Target is not ready in time")]
    NotReady { logs: String },

    /// The container runtime itself failed to execute a command.
    #[error("`{command}` exited with code {code}")]
    Infrastructure {
        command: String,
        code: i32,
        stdout: String,
    },

    /// A header specification on the command line could not be parsed.
    #[error("Invalid header: `{value}`. Headers must be in the `NAME:VALUE` or `NAME: VALUE` format")]
    InvalidHeader { value: String },

    /// Installed docker or docker-compose is older than the supported minimum.
    #[error("{tool} {installed} is not supported. You need to have at least {minimum}")]
    UnsupportedVersion {
        tool: String,
        installed: String,
        minimum: String,
    },

    /// The operator interrupted the run.
    #[error("Interrupted")]
    Interrupted,

    /// Filesystem failure while preparing or persisting run data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP failure while talking to the telemetry backend.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    /// Exit code the process should surface for this failure.
    ///
    /// Infrastructure errors propagate the underlying command's code
    /// verbatim; an interrupt maps to the conventional 130.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Infrastructure { code, .. } => *code,
            HarnessError::Interrupted => 130,
            _ => 1,
        }
    }
}
