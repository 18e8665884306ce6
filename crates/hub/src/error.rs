//! Error types for the agent hub.

use thiserror::Error;

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors that can occur on the hub call surface.
#[derive(Debug, Error)]
pub enum HubError {
	/// Connection-time credential was missing, malformed, or wrong.
	#[error("agent authentication rejected: {0}")]
	Auth(String),

	/// No live connection for the target identity.
	#[error("agent not connected: {0}")]
	NotConnected(String),

	/// The coordinator-side wait for a call exceeded its budget. The
	/// remote side may still be working; its late result will be
	/// discarded.
	#[error("rpc timeout after {ms}ms calling {method}")]
	Timeout { method: String, ms: u64 },

	/// The agent executed the call and reported failure.
	#[error("remote error ({kind}): {message}")]
	Remote { kind: String, message: String },

	/// The owning connection dropped while the call was in flight.
	#[error("agent disconnected mid-call")]
	Disconnected,

	/// Frame violated the wire contract.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// Internal channel closed unexpectedly.
	#[error("channel closed unexpectedly")]
	ChannelClosed,

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl HubError {
	/// True when retrying against a different agent could help.
	pub fn is_routing_failure(&self) -> bool {
		matches!(self, HubError::NotConnected(_) | HubError::Disconnected)
	}
}
