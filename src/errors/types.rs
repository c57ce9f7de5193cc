//! Error types for the volume manager
//!
//! This module defines the error conditions that can occur throughout the daemon,
//! the client library and the CLI, grouped by functional domain.

use thiserror::Error;
use std::path::PathBuf;

/// Main application error type
///
/// Variants are organized by domain: configuration, volume state, mount
/// execution, hardware queries, daemon transport, I/O, serialization and CLI.
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid configuration value for '{key}': {value}")]
    InvalidConfigValue {
        key: String,
        value: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unknown configuration key: {key}")]
    UnknownConfigKey {
        key: String,
    },

    // Volume state errors
    #[error("Unknown device: {device}")]
    UnknownDevice {
        device: String,
    },

    #[error("Volume '{device}' is not mounted")]
    NotMounted {
        device: String,
    },

    #[error("Volume '{device}' cannot go from {from} to {to}")]
    InvalidTransition {
        device: String,
        from: String,
        to: String,
    },

    // Mount executor errors
    #[error("Failed to {operation} '{device}': {reason}")]
    MountOperation {
        device: String,
        operation: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No autoplay service configured for '{device}'")]
    NoAutoplayService {
        device: String,
    },

    // Hardware query errors
    #[error("Hardware query failed for '{device}': {message}")]
    Hardware {
        device: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Daemon errors
    #[error("Daemon communication failed: {operation}")]
    DaemonCommunication {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IPC error: {message}")]
    Ipc {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        size: usize,
        limit: usize,
    },

    #[error("Unknown {kind} wire value: {value}")]
    UnknownWireValue {
        kind: &'static str,
        value: u32,
    },

    #[error("Socket error at '{path}': {operation}")]
    Socket {
        path: PathBuf,
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Template errors
    #[error("Template error: {message}")]
    Template {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // I/O errors
    #[error("File I/O error for '{path}': {operation}")]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Serialization errors
    #[error("Encoding error: {context}")]
    Encode {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Decoding error: {context}")]
    Decode {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("TOML parsing error: {context}")]
    TomlParsing {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // CLI errors
    #[error("Invalid command argument '{argument}': {reason}")]
    InvalidArgument {
        argument: String,
        reason: String,
    },

    // Process errors
    #[error("Process execution failed: {command}")]
    ProcessExecution {
        command: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Generic/catch-all errors
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new Config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an error for a device the registry does not know
    pub fn unknown_device(device: impl Into<String>) -> Self {
        Self::UnknownDevice {
            device: device.into(),
        }
    }

    /// Create a failed mount/unmount/eject error
    pub fn mount_operation(
        device: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MountOperation {
            device: device.into(),
            operation: operation.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a failed mount/unmount/eject error with source
    pub fn mount_operation_with_source(
        device: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MountOperation {
            device: device.into(),
            operation: operation.into(),
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a hardware query error
    pub fn hardware(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hardware {
            device: device.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a new IPC error
    pub fn ipc(message: impl Into<String>) -> Self {
        Self::Ipc {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new IPC error with source
    pub fn ipc_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Ipc {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new I/O error with source
    pub fn io_with_source(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io {
            path: path.into(),
            operation: operation.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new Template error with source
    pub fn template_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Template {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if retrying the operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DaemonCommunication { .. }
                | Self::Ipc { .. }
                | Self::Socket { .. }
                | Self::MountOperation { .. }
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } | Self::InvalidConfigValue { .. } | Self::UnknownConfigKey { .. } => "config",
            Self::UnknownDevice { .. } | Self::NotMounted { .. } | Self::InvalidTransition { .. } => "volume",
            Self::MountOperation { .. } | Self::NoAutoplayService { .. } => "executor",
            Self::Hardware { .. } => "hardware",
            Self::DaemonCommunication { .. }
            | Self::Ipc { .. }
            | Self::FrameTooLarge { .. }
            | Self::UnknownWireValue { .. }
            | Self::Socket { .. } => "daemon",
            Self::Template { .. } => "template",
            Self::Io { .. } => "io",
            Self::Encode { .. } | Self::Decode { .. } | Self::TomlParsing { .. } => "serialization",
            Self::InvalidArgument { .. } => "cli",
            Self::ProcessExecution { .. } => "system",
            Self::Other { .. } => "internal",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        let operation = match err.kind() {
            std::io::ErrorKind::NotFound => "file not found",
            std::io::ErrorKind::PermissionDenied => "permission denied",
            std::io::ErrorKind::ConnectionRefused => "connection refused",
            std::io::ErrorKind::ConnectionAborted => "connection aborted",
            std::io::ErrorKind::UnexpectedEof => "unexpected end of stream",
            _ => "I/O operation",
        }
        .to_string();

        Self::Io {
            path: PathBuf::from("unknown"),
            operation,
            source: Some(Box::new(err)),
        }
    }
}

impl From<bincode::error::EncodeError> for AppError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Encode {
            context: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bincode::error::DecodeError> for AppError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Decode {
            context: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            context: format!("JSON error at line {} column {}", err.line(), err.column()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::TomlParsing {
            context: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AppError::config("test config error");
        assert_eq!(err.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_error_category() {
        assert_eq!(AppError::config("test").category(), "config");
        assert_eq!(AppError::unknown_device("/dev/sdb1").category(), "volume");
        assert_eq!(
            AppError::mount_operation("/dev/sdb1", "unmount", "busy").category(),
            "executor"
        );
        assert_eq!(AppError::ipc("closed").category(), "daemon");
    }

    #[test]
    fn test_mount_operation_message() {
        let err = AppError::mount_operation("udi-1", "unmount", "target is busy");
        assert_eq!(err.to_string(), "Failed to unmount 'udi-1': target is busy");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::ipc("broken pipe").is_retryable());
        assert!(!AppError::unknown_device("x").is_retryable());
        assert!(!AppError::config("test").is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let app_err: AppError = io_err.into();

        match app_err {
            AppError::Io { operation, .. } => {
                assert_eq!(operation, "unexpected end of stream");
            }
            _ => panic!("Wrong error type"),
        }
    }
}
