//! Error types for sshrepl-core.

use thiserror::Error;

/// Main error type for sshrepl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing startup configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Credential store lookup failed.
    #[error("credential error: {message}")]
    Credential { message: String },

    /// Key material could not be parsed or used.
    #[error("key error: {message}")]
    Key { message: String },

    /// The random source could not produce a comparison key.
    #[error("entropy source failure: {message}")]
    Entropy { message: String },

    /// Evaluation engine failed to start or run.
    #[error("engine error: {message}")]
    Engine { message: String },

    /// Channel operation failed.
    #[error("channel error: {message}")]
    Channel { message: String },

    /// Transport layer error.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Connection was closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error must stop the process.
    ///
    /// Only startup problems are fatal; everything that happens on a single
    /// connection is contained to that connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. })
    }
}

/// Convenience result type for sshrepl operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = Error::config("Missing/Invalid port");
        assert_eq!(err.to_string(), "configuration error: Missing/Invalid port");
    }

    #[test]
    fn error_display_entropy() {
        let err = Error::Entropy {
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "entropy source failure: unavailable");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::config("bad").is_fatal());

        assert!(!Error::ConnectionClosed.is_fatal());
        assert!(!Error::Transport {
            message: "reset".into()
        }
        .is_fatal());
        assert!(!Error::Entropy {
            message: "gone".into()
        }
        .is_fatal());
    }
}
