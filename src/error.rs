//! Error types for Offline Core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by the part of the download engine that raises them
//! (transfer, storage, export, queue state) so the queue can route each one to
//! the right status transition.
//!
//! ## Routing
//!
//! - `Cancelled` → the transfer was interrupted by `pause`/`remove`; the item
//!   becomes `paused` (or disappears), never `failed`.
//! - Transfer errors (`TransferFailed`, `NetworkError`, `UnexpectedStatusCode`,
//!   `StalledTransfer`) → the item becomes `failed` and a notification is sent.
//! - Storage errors (`StorageError`, `QuotaExceeded`) → a failed write keeps the
//!   item out of `completed`; failed deletes during cleanup are logged only.
//! - `NotFoundOnExport` → surfaced to the caller, metadata is left as-is.

use thiserror::Error;

/// Result type alias using our OfflineError type
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Main error type for Offline Core
#[derive(Error, Debug)]
pub enum OfflineError {
    // ===== Transfer Errors =====

    /// Transfer was cancelled through its cancellation signal
    #[error("Transfer cancelled")]
    Cancelled,

    /// Generic transfer failure
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned unexpected status code
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// No bytes arrived within the configured idle window
    #[error("Transfer stalled: no data received for {idle_secs} seconds")]
    StalledTransfer {
        idle_secs: u64,
    },

    // ===== Storage Errors =====

    /// Blob store rejected an operation
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Blob store quota would be exceeded by a write
    #[error("Storage quota exceeded (need {need} bytes, quota {quota} bytes)")]
    QuotaExceeded {
        need: u64,
        quota: u64,
    },

    /// Export requested but no blob exists for a completed item
    #[error("No stored media found for '{0}'")]
    NotFoundOnExport(String),

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    // ===== Queue/State Errors =====

    /// Rejected status transition
    #[error("Invalid transition for '{item_id}': {from} -> {to}")]
    InvalidTransition {
        item_id: String,
        from: String,
        to: String,
    },

    /// Record not found
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Application state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file or value is invalid
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The queue actor has stopped and no longer accepts commands
    #[error("Download queue has shut down")]
    Shutdown,

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed source URL
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),
}

// Helper methods for creating common errors
impl OfflineError {
    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        OfflineError::RecordNotFound(resource.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        OfflineError::InvalidInput(message.into())
    }

    /// Create a StorageError with a message
    pub fn storage<S: Into<String>>(message: S) -> Self {
        OfflineError::StorageError(message.into())
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        OfflineError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Check if the error is the cancellation signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, OfflineError::Cancelled)
    }

    /// Check if error is retryable (network errors, stalls, server errors)
    ///
    /// The queue never retries on its own; this only drives whether the UI
    /// offers a retry affordance.
    pub fn is_retryable(&self) -> bool {
        match self {
            OfflineError::NetworkError { is_transient, .. } => *is_transient,
            OfflineError::StalledTransfer { .. } => true,
            OfflineError::UnexpectedStatusCode { status_code, .. } => *status_code >= 500,
            OfflineError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            OfflineError::TransferFailed(_) => true,
            _ => false,
        }
    }

    /// Check if error came from the blob store or the metadata database
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            OfflineError::StorageError(_)
                | OfflineError::QuotaExceeded { .. }
                | OfflineError::NotFoundOnExport(_)
                | OfflineError::MigrationFailed(_)
                | OfflineError::SqlxError(_)
                | OfflineError::IoError(_)
        )
    }

    /// Get user-friendly error message suitable for a transient notification
    pub fn user_message(&self) -> String {
        match self {
            OfflineError::Cancelled => "Download paused.".to_string(),
            OfflineError::QuotaExceeded { need, quota } => {
                format!(
                    "Not enough offline storage. Need {} MB, but the limit is {} MB.",
                    need / 1_000_000,
                    quota / 1_000_000
                )
            }
            OfflineError::NotFoundOnExport(id) => {
                format!("The downloaded file for '{}' could not be found.", id)
            }
            OfflineError::StalledTransfer { .. } | OfflineError::NetworkError { .. } => {
                "Download failed due to a network problem. Please try again.".to_string()
            }
            OfflineError::UnexpectedStatusCode { status_code, .. } => {
                format!("Download failed (server returned {}). Please try again.", status_code)
            }
            OfflineError::Shutdown => "Downloads are not available right now.".to_string(),
            _ => self.to_string(),
        }
    }
}
