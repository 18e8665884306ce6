//! Error types for the scheduling layer.

use thiserror::Error;

/// Result type alias for scheduling operations.
pub type Result<T> = std::result::Result<T, SchedError>;

/// Errors that can occur in the scheduling layer.
#[derive(Debug, Error)]
pub enum SchedError {
	/// The queue's worker or channel has shut down.
	#[error("job queue closed")]
	QueueClosed,

	/// The account vanished or is inactive.
	#[error("account not found or inactive: {0}")]
	AccountNotFound(String),

	/// The persistence collaborator failed.
	#[error("store error: {0}")]
	Store(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
