//! Error types for voltage-registers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("Invalid range: end {end} is before start {start} or beyond 65535")]
    InvalidRange { start: u32, end: u32 },

    #[error("Invalid span limit: {0}")]
    InvalidSpan(usize),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Short read at {start}: expected {expected} words, got {actual}")]
    ShortRead {
        start: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RegisterError {
    /// Create an invalid range error from raw bounds
    pub fn invalid_range(start: impl Into<u32>, end: impl Into<u32>) -> Self {
        Self::InvalidRange {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a rejected-request error (device exception response)
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from device I/O
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Rejected(_) | Self::ShortRead { .. }
        )
    }
}

impl From<std::io::Error> for RegisterError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout(err.to_string()),
            _ => Self::Connection(err.to_string()),
        }
    }
}

impl From<figment::Error> for RegisterError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegisterError>;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_invalid_range_error() {
        let err = RegisterError::invalid_range(10u16, 5u16);
        assert_eq!(
            err.to_string(),
            "Invalid range: end 5 is before start 10 or beyond 65535"
        );
        assert!(!err.is_io());
    }

    #[test]
    fn test_short_read_error() {
        let err = RegisterError::ShortRead {
            start: 100,
            expected: 10,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Short read at 100: expected 10 words, got 4"
        );
        assert!(err.is_io());
    }

    #[test]
    fn test_io_error_conversion() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "no response");
        assert!(matches!(
            RegisterError::from(timed_out),
            RegisterError::Timeout(_)
        ));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = RegisterError::from(reset);
        assert!(matches!(err, RegisterError::Connection(_)));
        assert!(err.is_io());
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(
            RegisterError::rejected("illegal data address"),
            RegisterError::Rejected(_)
        ));
        assert_eq!(
            RegisterError::config("bad table").to_string(),
            "Configuration error: bad table"
        );
    }

    #[test]
    fn test_from_anyhow_error() {
        let err: RegisterError = anyhow::anyhow!("test error").into();
        assert!(matches!(err, RegisterError::Other(_)));
        assert!(err.to_string().contains("test error"));
    }
}
