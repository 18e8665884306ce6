//! Error types for the browser-domain engine.

use cw_protocol::{RemoteError, error_kind};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while driving a storefront session.
#[derive(Debug, Error)]
pub enum CoreError {
	/// Site demanded a fresh login. Deliberately not auto-retried:
	/// hammering a deauthenticated session risks account penalties.
	#[error("session deauthenticated, login required")]
	NeedsLogin,

	/// Site served a captcha challenge. Same no-retry policy.
	#[error("session challenged with captcha")]
	NeedsCaptcha,

	/// Page or context is unusable; the session must be rebuilt.
	#[error("session invalid: {0}")]
	SessionInvalid(String),

	/// An incremental collection loop exhausted its retries without
	/// reaching a completion signal.
	#[error("gave up after {rounds} rounds: {reason}")]
	ConvergenceGiveUp { rounds: u32, reason: String },

	/// A bounded wait inside an operation ran out.
	#[error("timeout after {ms}ms waiting for: {condition}")]
	Timeout { ms: u64, condition: String },

	/// Any other page-interaction failure.
	#[error("page error: {0}")]
	Page(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl CoreError {
	/// True for site risk signals that must pause scheduling.
	pub fn is_risk_signal(&self) -> bool {
		matches!(self, CoreError::NeedsLogin | CoreError::NeedsCaptcha)
	}

	/// Maps to the stable wire error kind.
	pub fn remote_kind(&self) -> &'static str {
		match self {
			CoreError::NeedsLogin => error_kind::NEEDS_LOGIN,
			CoreError::NeedsCaptcha => error_kind::NEEDS_CAPTCHA,
			CoreError::SessionInvalid(_) => error_kind::SESSION_INVALID,
			CoreError::ConvergenceGiveUp { .. } => error_kind::CONVERGENCE_GIVE_UP,
			CoreError::Timeout { .. } => error_kind::TIMEOUT,
			CoreError::Page(_) | CoreError::Json(_) => error_kind::PAGE,
		}
	}
}

impl From<&CoreError> for RemoteError {
	fn from(err: &CoreError) -> Self {
		RemoteError::new(err.remote_kind(), err.to_string())
	}
}
