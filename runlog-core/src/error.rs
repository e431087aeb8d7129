//! Error types for the runlog core library.
//!
//! Uses `thiserror` for public API error types. Anything that could corrupt the
//! run identity or write into the wrong archive is an error; outcomes that only
//! affect observability (a missed sync, no log files yet) are reported as
//! notices and `None` results instead.

/// Top-level error type for the runlog core library.
#[derive(Debug, thiserror::Error)]
pub enum RunlogError {
    #[error("Missing required configuration: {var}")]
    MissingConfig { var: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Sync transport error: {0}")]
    SyncTransport(#[from] SyncTransportError),

    #[error("Event file name error: {0}")]
    FileName(#[from] FileNameError),

    #[error("Event writer error: {message}")]
    Writer { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunlogError {
    pub fn missing_config(var: impl Into<String>) -> Self {
        Self::MissingConfig { var: var.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn writer(message: impl Into<String>) -> Self {
        Self::Writer {
            message: message.into(),
        }
    }
}

/// Errors from pushing the local log tree to the remote mirror.
#[derive(Debug, thiserror::Error)]
pub enum SyncTransportError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}: {stderr}", describe_exit(.code))]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Mirror IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk local log tree: {message}")]
    Walk { message: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Errors from parsing an event file name against the configured layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileNameError {
    #[error("File name is not valid UTF-8")]
    NonUtf8,

    #[error("File name does not start with the expected prefix")]
    PrefixMismatch,

    #[error("File name has {found} dot-separated fields, at least {required} required")]
    TooFewFields { found: usize, required: usize },

    #[error("Timestamp field '{field}' is not an integer")]
    InvalidTimestamp { field: String },

    #[error("Host field is empty")]
    EmptyHost,
}

/// A type alias for results using the top-level `RunlogError`.
pub type Result<T> = std::result::Result<T, RunlogError>;
