//! Error types shared by the catalog, migration, supplier and command-tree layers.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by catalog and command-tree operations
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// A mutating operation was attempted without holding the write lock.
    #[error("cannot {operation} because the catalog is not locked")]
    NotLocked { operation: &'static str },

    /// The advisory lock could not be acquired before the timeout elapsed.
    #[error(
        "timed out after {waited:?} waiting for lock on {}; it may be held by a stale process",
        .path.display()
    )]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("failed to {operation} {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to encode YAML: {source}")]
    Encode {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid plugin record: {0}")]
    InvalidPlugin(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// Plugin help output did not match the expected layout.
    #[error("unrecognized help output from plugin '{plugin}' for '{command}': {message}")]
    HelpFormat {
        plugin: String,
        command: String,
        message: String,
    },

    #[error("failed to run plugin '{plugin}': {message}")]
    PluginExec { plugin: String, message: String },
}

impl CatalogError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = CatalogError::NotLocked { operation: "upsert plugin" };
        assert_eq!(
            err.to_string(),
            "cannot upsert plugin because the catalog is not locked"
        );

        let err = CatalogError::io(
            "read catalog",
            "/tmp/catalog.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("read catalog"));
        assert!(msg.contains("/tmp/catalog.yaml"));

        let err = CatalogError::LockTimeout {
            path: PathBuf::from("/tmp/catalog.yaml"),
            waited: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("stale process"));
    }
}
