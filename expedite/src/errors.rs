use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    /// Cancellation was observed at a wait point. Not a failure: the run
    /// unwinds and reports "stopped" with its progress intact.
    #[error("Operation aborted")]
    Aborted,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Screen classification failed: {0}")]
    ClassificationFailure(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("A run is already active: {0}")]
    AlreadyRunning(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutomationError {
    pub fn is_abort(&self) -> bool {
        matches!(self, AutomationError::Aborted)
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(error: serde_json::Error) -> Self {
        AutomationError::Config(format!("Settings document error: {error}"))
    }
}

impl From<regex::Error> for AutomationError {
    fn from(error: regex::Error) -> Self {
        AutomationError::InvalidArgument(format!("Invalid title pattern: {error}"))
    }
}
