use thiserror::Error;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Time limit exceeded")]
    Timeout,

    #[error("Stream limit exceeded")]
    StreamLimitExceeded,

    #[error("Boot time changed: expected {expected}, host reports {actual}")]
    BootTimeChanged { expected: u64, actual: u64 },

    #[error("Not a regular file: {0}")]
    NotRegularFile(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed host output. Carries the text that failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to parse {what}: {reason}\n{text}")]
pub struct ParseError {
    pub what: &'static str,
    pub reason: String,
    pub text: String,
}

impl ParseError {
    pub fn new(what: &'static str, reason: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            what,
            reason: reason.into(),
            text: text.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid path '{path}': {reason}")]
    Path { path: String, reason: &'static str },

    #[error("Invalid task id: {0}")]
    TaskId(String),

    #[error("Invalid resource allocation: {0}")]
    Allocation(String),

    #[error("Invalid task configuration: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    Argument(String),
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Task id conflict: {0}")]
    TaskIdConflict(String),

    #[error("Task in wrong state: {0}")]
    TaskState(String),

    #[error("Host rebooted: executor bound to boot {expected}, host reports {actual}")]
    Rebooted { expected: u64, actual: u64 },

    #[error("Critical error\n{stderr}")]
    Critical { stderr: String },

    #[error("Unrecognized error (exit code {code})\n{stderr}")]
    Unrecognized { code: i32, stderr: String },

    #[error("Time limit exceeded")]
    Timeout,

    #[error("Stream limit exceeded")]
    StreamLimitExceeded,

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Invalid(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for ExecutorError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => ExecutorError::Timeout,
            TransportError::StreamLimitExceeded => ExecutorError::StreamLimitExceeded,
            TransportError::BootTimeChanged { expected, actual } => {
                ExecutorError::Rebooted { expected, actual }
            }
            TransportError::Io(e) => ExecutorError::Io(e),
            other => ExecutorError::Transport(other.to_string()),
        }
    }
}
