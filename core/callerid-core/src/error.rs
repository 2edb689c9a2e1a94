//! Error types for callerid-core operations.
//! Keep CallerIdFfiError minimal and stable to avoid breaking host bindings.

use std::path::PathBuf;

use callerid_protocol::ErrorInfo;

// ═══════════════════════════════════════════════════════════════════════════════
// FFI-Compatible Error (for Kotlin/Swift)
// ═══════════════════════════════════════════════════════════════════════════════

/// FFI-safe error type for use across language boundaries.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CallerIdFfiError {
    #[error("{message}")]
    General { message: String },
}

impl From<CallerIdError> for CallerIdFfiError {
    fn from(err: CallerIdError) -> Self {
        CallerIdFfiError::General {
            message: err.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Internal Error (for Rust-only use)
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur in callerid-core operations.
///
/// For FFI boundaries, use `CallerIdFfiError` instead.
#[derive(Debug, thiserror::Error)]
pub enum CallerIdError {
    // ─────────────────────────────────────────────────────────────────────
    // Payload Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid phone-book payload: {code}: {message}")]
    InvalidPayload { code: String, message: String },

    // ─────────────────────────────────────────────────────────────────────
    // Host Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Overlay permission not granted")]
    OverlayPermissionDenied,

    #[error("Host call failed: {operation}: {details}")]
    Host { operation: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Directory Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Directory entry {number} is not above previous entry {previous}")]
    DirectoryOutOfOrder { previous: u64, number: u64 },

    #[error("Directory rejected entry {number}: {details}")]
    DirectoryRejected { number: u64, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage root not found: {0}")]
    StorageRootNotFound(PathBuf),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CallerIdError {
    pub fn host(operation: &str, details: impl Into<String>) -> Self {
        CallerIdError::Host {
            operation: operation.to_string(),
            details: details.into(),
        }
    }
}

impl From<ErrorInfo> for CallerIdError {
    fn from(info: ErrorInfo) -> Self {
        CallerIdError::InvalidPayload {
            code: info.code,
            message: info.message,
        }
    }
}

/// Convenience type alias for Results using CallerIdError.
pub type Result<T> = std::result::Result<T, CallerIdError>;

impl From<CallerIdError> for String {
    fn from(err: CallerIdError) -> String {
        err.to_string()
    }
}
