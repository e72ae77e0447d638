//! Error types for provisioning operations.

use thiserror::Error;

/// Primary error type for provisioning operations.
#[derive(Error, Debug)]
pub enum EspvError {
    // Layout document errors
    #[error("Layout document is not a JSON object: {0}")]
    InvalidLayout(String),

    #[error("No valid flash entries found in layout document")]
    NoValidEntries,

    // External tool errors
    #[error("{tool} invocation failed: {detail}")]
    ToolInvocation { tool: String, detail: String },

    #[error("{tool} did not finish within {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("No valid validation hash reported for base image: {detail}")]
    FingerprintUnavailable { detail: String },

    #[error("Delta generation failed: {detail}")]
    DiffFailed { detail: String },

    // Binary format errors
    #[error("Malformed fingerprint hex: {0}")]
    MalformedFingerprint(String),

    #[error("Not a patch container: {0}")]
    BadContainer(String),

    // Record store errors
    #[error("Record has no hw_id field")]
    MissingKey,

    // I/O errors, permission failures kept distinct
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serial transport errors
    #[error("Serial transport error on {port}: {detail}")]
    Transport { port: String, detail: String },

    #[error("{0}")]
    Other(String),
}

impl EspvError {
    /// Wrap an I/O error, promoting permission failures to their own variant.
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied {
                path: path.display().to_string(),
            }
        } else {
            Self::Io(err)
        }
    }

    /// Returns true if the error is recoverable by the user.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidLayout(_)
                | Self::NoValidEntries
                | Self::MissingKey
                | Self::PermissionDenied { .. }
                | Self::Transport { .. }
        )
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NoValidEntries => {
                Some("Check that the built images exist next to the layout document or under build/")
            }
            Self::InvalidLayout(_) => Some("Point espv at a flasher_args.json produced by the build"),
            Self::ToolInvocation { .. } | Self::ToolTimeout { .. } => {
                Some("Verify the tool is installed and on PATH, or set --esptool / --diff-tool")
            }
            Self::PermissionDenied { .. } => {
                Some("Check file permissions; provisioning stations often run restricted accounts")
            }
            Self::Transport { .. } => Some("Check the port with: espv ports"),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using EspvError.
pub type Result<T> = std::result::Result<T, EspvError>;
