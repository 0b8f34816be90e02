//! Error types for the collaborator abstraction layer.
//!
//! Every error carries a numeric status. The campaign driver never
//! reinterprets these: a fatal error terminates the process with
//! `status()` as its exit code. Defaults follow the BSD `sysexits`
//! convention (65 data error, 66 missing input, 70 software, 74 I/O).

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a fit engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Analysis radius does not fit the map, or a source lies off the map
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Response (PSF/SAR/EDP) data missing or unreadable
    #[error("Response error: {0}")]
    Response(String),

    /// Internal failure of the fit itself, with the engine's own status
    #[error("Fit error (status {status}): {message}")]
    Fit { status: i32, message: String },

    /// Output could not be written
    #[error("I/O error: {0}")]
    Io(String),
}

impl EngineError {
    /// Creates a geometry error.
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    /// Creates a response error.
    pub fn response(msg: impl Into<String>) -> Self {
        Self::Response(msg.into())
    }

    /// Creates a fit error with an explicit status.
    pub fn fit(status: i32, msg: impl Into<String>) -> Self {
        Self::Fit {
            status,
            message: msg.into(),
        }
    }

    /// Process status to report for this error.
    pub fn status(&self) -> i32 {
        match self {
            EngineError::Geometry(_) => 65,
            EngineError::Response(_) => 66,
            EngineError::Fit { status, .. } => *status,
            EngineError::Io(_) => 74,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised by map and diffuse stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The keyed file does not exist
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Read or write failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a valid map
    #[error("Malformed map {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl StoreError {
    /// Creates an I/O error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process status to report for this error.
    pub fn status(&self) -> i32 {
        match self {
            StoreError::NotFound(_) => 66,
            StoreError::Io { .. } => 74,
            StoreError::Malformed { .. } => 65,
        }
    }
}
