/// Shared error type used across all agentgate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("lock timeout: {0}")]
    LockTimeout(String),

    #[error("approval required: {0}")]
    ApprovalRequired(String),

    #[error("tool blocked: {0}")]
    ToolBlocked(String),

    #[error("tool execution: {0}")]
    ToolExecution(String),

    #[error("transcript write failed: {0}")]
    TranscriptWrite(String),

    #[error("provider: {0}")]
    Provider(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable wire code carried in response frames (`error.code`).
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Protocol(_) => "protocol_error",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Unauthorized(_) => "unauthorized",
            Error::LockTimeout(_) => "lock_timeout",
            Error::ApprovalRequired(_) => "approval_required",
            Error::ToolBlocked(_) => "tool_blocked",
            Error::ToolExecution(_) => "tool_execution_error",
            Error::TranscriptWrite(_) => "transcript_write_failed",
            Error::Provider(_) => "provider_error",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "config_error",
            Error::Other(_) => "internal",
        }
    }

    /// Whether the caller may retry the same request verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout(_) | Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
