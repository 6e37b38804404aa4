//! Configuration error types for loading, parsing and resolving config files.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or resolving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("Invalid configuration at {path}:{line}:{column}: {message}")]
    ParseError {
        path: PathBuf,
        /// One-based line index of the error (0 if unknown).
        line: usize,
        /// One-based column index of the error (0 if unknown).
        column: usize,
        message: String,
    },

    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// A configuration file already exists at the target path.
    #[error("Configuration file already exists: {path}")]
    AlreadyExists { path: PathBuf },

    /// Failed to write a configuration file to disk.
    #[error("Failed to write configuration file: {path}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A duration field holds something `humantime` cannot parse.
    #[error("Invalid duration for `{field}`: {value:?} ({message})")]
    InvalidDuration {
        field: &'static str,
        value: String,
        message: String,
    },

    /// An endpoint is not a `ws://` or `wss://` URL.
    #[error("Invalid endpoint for `{field}`: {value:?} (expected ws:// or wss:// URL)")]
    InvalidEndpoint { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_read_error() {
        let err = ConfigError::ReadError {
            path: PathBuf::from("/etc/keyrx/config.toml"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        };
        let msg = err.to_string();
        assert!(
            msg.contains("/etc/keyrx/config.toml"),
            "ReadError display should include the path"
        );
        assert!(
            msg.contains("Failed to read"),
            "ReadError display should describe the failure"
        );
    }

    #[test]
    fn display_parse_error() {
        let err = ConfigError::ParseError {
            path: PathBuf::from("config.toml"),
            line: 5,
            column: 12,
            message: "expected `=`".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("5:12"), "ParseError should include line:column");
        assert!(
            msg.contains("expected `=`"),
            "ParseError should include the message"
        );
    }

    #[test]
    fn display_not_found_error() {
        let err = ConfigError::NotFound {
            path: PathBuf::from("/missing/config.toml"),
        };
        assert!(
            err.to_string().contains("/missing/config.toml"),
            "NotFound display should include the path"
        );
    }

    #[test]
    fn display_already_exists_error() {
        let err = ConfigError::AlreadyExists {
            path: PathBuf::from("/home/user/.config/keyrx-client/config.toml"),
        };
        let msg = err.to_string();
        assert!(msg.contains("already exists"));
        assert!(msg.contains("config.toml"));
    }

    #[test]
    fn display_invalid_duration() {
        let err = ConfigError::InvalidDuration {
            field: "rpc.default_timeout",
            value: "soon".to_string(),
            message: "expected number at 0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rpc.default_timeout"));
        assert!(msg.contains("\"soon\""));
    }

    #[test]
    fn display_invalid_endpoint() {
        let err = ConfigError::InvalidEndpoint {
            field: "connection.rpc_url",
            value: "http://localhost".to_string(),
        };
        assert!(err.to_string().contains("ws://"));
    }

    #[test]
    fn read_error_source_chain() {
        let err = ConfigError::ReadError {
            path: PathBuf::from("/secret"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
        };
        assert!(
            std::error::Error::source(&err).is_some(),
            "ReadError should chain the I/O source"
        );
    }
}
