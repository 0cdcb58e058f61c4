use thiserror::Error;

/// Daemon-wide error type
#[derive(Error, Debug)]
pub enum PowerError {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("GPIO error [{line}]: {reason}")]
    Gpio { line: String, reason: String },

    #[error("LPC-SIO error: {0}")]
    Sio(String),

    #[error("I2C error: {0}")]
    I2c(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("state file error: {0}")]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PowerError {
    /// Shorthand for GPIO failures tagged with the symbolic line name.
    pub fn gpio(line: &str, reason: impl ToString) -> Self {
        Self::Gpio {
            line: line.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias used across the daemon
pub type Result<T> = std::result::Result<T, PowerError>;
