use std::path::PathBuf;

use crate::engine::ExtractionState;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Malformed playlist text: missing header, bad directive or bad IV.
    #[error("invalid playlist: {0}")]
    Format(String),

    /// Non-2xx status or transport failure on a playlist or key fetch.
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decryption failed: {0}")]
    Crypto(String),

    #[error("variant index {index} is out of range ({available} available)")]
    ResolutionIndex { index: usize, available: usize },

    #[error("cannot {operation} while the extraction is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ExtractionState,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ExtractError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub fn http(url: impl ToString, reason: impl ToString) -> Self {
        Self::Http {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
