//! Errors surfaced by the texture codec
//!
//! Every variant carries the offending path. Field-level problems inside
//! header parsing never end up here; they degrade to defaults instead.

use std::path::PathBuf;

/// Result alias used throughout the codec
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Bad magic or structurally invalid header
    #[error("{}: invalid container header at byte {offset}: {message}", path.display())]
    Format {
        path: PathBuf,
        offset: usize,
        message: String,
    },

    /// Payload does not match the declared geometry, or the scheme is unsupported
    #[error("{}: {message}{}", path.display(), mismatch_suffix(*expected, *actual))]
    Decode {
        path: PathBuf,
        message: String,
        expected: Option<usize>,
        actual: Option<usize>,
    },

    /// Compressor rejected the pixel data
    #[error("{}: failed to encode texture: {message}", path.display())]
    Encode { path: PathBuf, message: String },

    /// External converter missing, failed, or timed out
    #[error("{tool} failed on {}: {reason}", path.display())]
    ToolInvocation {
        tool: String,
        path: PathBuf,
        reason: String,
    },

    /// Extension not handled by any parser
    #[error("{}: unsupported texture format '{extension}'", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Side-car metadata could not be written or read
    #[error("{}: bad metadata side-car: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn mismatch_suffix(expected: Option<usize>, actual: Option<usize>) -> String {
    match (expected, actual) {
        (Some(expected), Some(actual)) => {
            format!(" (expected {} bytes, found {})", expected, actual)
        }
        _ => String::new(),
    }
}

impl CodecError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(
        path: impl Into<PathBuf>,
        offset: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Format {
            path: path.into(),
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_scheme(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Path of the file that triggered the error
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Format { path, .. }
            | Self::Decode { path, .. }
            | Self::Encode { path, .. }
            | Self::ToolInvocation { path, .. }
            | Self::UnsupportedFormat { path, .. }
            | Self::Io { path, .. }
            | Self::Image { path, .. }
            | Self::Metadata { path, .. } => path,
        }
    }

    /// Only tool failures are worth retrying, after checking the tool is there.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolInvocation { .. })
    }
}
