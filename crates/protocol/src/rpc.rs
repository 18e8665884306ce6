//! Message types for the coordinator ⇄ agent RPC channel.
//!
//! The channel is a persistent WebSocket carrying JSON text frames. Every
//! frame is one [`WireMessage`]. The flow for a single remote call:
//!
//! 1. Agent connects and sends [`WireMessage::Hello`] with its capabilities
//! 2. Coordinator sends [`WireMessage::Rpc`] with a fresh `request_id`
//! 3. Agent replies with zero or more [`WireMessage::RpcProgress`] frames
//! 4. Agent sends exactly one terminal [`WireMessage::RpcResult`]
//! 5. Unsolicited [`WireMessage::Ping`]/[`WireMessage::Pong`] keep the
//!    connection alive in both directions
//!
//! Authentication is carried out-of-band at connection establishment
//! (headers/query), never in message bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close code sent when a newer connection supersedes an existing one for
/// the same agent identity. Distinguishable from network failure so the
/// losing side does not reconnect-storm.
pub const CLOSE_REPLACED: u16 = 4001;

/// Close code sent when the hub drops a connection that went silent with
/// no call in flight.
pub const CLOSE_STALE: u16 = 4002;

/// Close code sent when connection-time authentication is rejected.
pub const CLOSE_AUTH_REJECTED: u16 = 4003;

/// A single frame on the agent channel.
///
/// This is a closed union: unknown `type` tags fail decoding at the
/// boundary rather than leaking untyped JSON into call handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
	/// First frame from a freshly connected agent.
	Hello {
		/// RPC method names this agent can execute (e.g. `"cart.collect"`).
		capabilities: Vec<String>,
		/// Agent build version, for operator display only.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		version: Option<String>,
	},
	/// Coordinator-initiated call.
	Rpc {
		#[serde(rename = "requestId")]
		request_id: u64,
		/// Method name, namespaced like `"cart.collect"`.
		method: String,
		/// Method parameters as a JSON object.
		params: Value,
	},
	/// Interim progress for an in-flight call. Zero or more per call,
	/// strictly before its terminal result.
	RpcProgress {
		#[serde(rename = "requestId")]
		request_id: u64,
		progress: Progress,
		/// Optional human-readable progress line.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		log: Option<String>,
	},
	/// Terminal result for a call. Exactly one per call.
	RpcResult {
		#[serde(rename = "requestId")]
		request_id: u64,
		ok: bool,
		/// Success payload; present iff `ok`.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		result: Option<Value>,
		/// Failure payload; present iff `!ok`.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<RemoteError>,
	},
	/// Keepalive probe. Either side may send at any time.
	Ping,
	/// Keepalive reply.
	Pong,
}

/// Counters describing how far a long-running remote operation has come.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
	/// Total work units, when known up front (0 when unknown).
	pub total: u64,
	/// Units attempted so far.
	pub current: u64,
	/// Units that succeeded.
	pub success: u64,
	/// Units that failed.
	pub failed: u64,
}

/// Error payload carried inside a failed [`WireMessage::RpcResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
	/// Stable error kind (e.g. `"needs_captcha"`, `"session_invalid"`).
	pub kind: String,
	/// Human-readable message.
	pub message: String,
}

/// Stable `RemoteError::kind` values shared by both sides of the wire.
pub mod error_kind {
	/// Site demanded a fresh login; the session is deauthenticated.
	pub const NEEDS_LOGIN: &str = "needs_login";
	/// Site served a captcha challenge.
	pub const NEEDS_CAPTCHA: &str = "needs_captcha";
	/// Browser session unusable; a rebuild is required.
	pub const SESSION_INVALID: &str = "session_invalid";
	/// Incremental collection never reached its completion signal.
	pub const CONVERGENCE_GIVE_UP: &str = "convergence_give_up";
	/// A wait inside the operation exceeded its budget.
	pub const TIMEOUT: &str = "timeout";
	/// Any other page-interaction failure.
	pub const PAGE: &str = "page";
	/// The agent does not implement the requested method.
	pub const UNSUPPORTED: &str = "unsupported";
}

impl RemoteError {
	pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			kind: kind.into(),
			message: message.into(),
		}
	}

	/// True when the error is a site risk signal (captcha / forced login)
	/// that must pause scheduling rather than be retried.
	pub fn is_risk_signal(&self) -> bool {
		self.kind == error_kind::NEEDS_LOGIN || self.kind == error_kind::NEEDS_CAPTCHA
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hello_serializes_with_type_tag() {
		let msg = WireMessage::Hello {
			capabilities: vec!["cart.collect".into()],
			version: None,
		};
		let json = serde_json::to_string(&msg).unwrap();
		assert!(json.contains(r#""type":"hello""#));
		assert!(json.contains(r#""capabilities":["cart.collect"]"#));
		assert!(!json.contains("version"));
	}

	#[test]
	fn rpc_uses_camel_case_request_id() {
		let msg = WireMessage::Rpc {
			request_id: 7,
			method: "cart.collect".into(),
			params: serde_json::json!({"accountId": "a1"}),
		};
		let json = serde_json::to_string(&msg).unwrap();
		assert!(json.contains(r#""type":"rpc""#));
		assert!(json.contains(r#""requestId":7"#));
	}

	#[test]
	fn progress_frame_round_trips() {
		let json = r#"{"type":"rpc_progress","requestId":3,"progress":{"total":10,"current":4,"success":3,"failed":1},"log":"item 4/10"}"#;
		let msg: WireMessage = serde_json::from_str(json).unwrap();
		match msg {
			WireMessage::RpcProgress {
				request_id,
				progress,
				log,
			} => {
				assert_eq!(request_id, 3);
				assert_eq!(progress.current, 4);
				assert_eq!(log.as_deref(), Some("item 4/10"));
			}
			other => panic!("expected rpc_progress, got {other:?}"),
		}
	}

	#[test]
	fn result_error_side_round_trips() {
		let json = r#"{"type":"rpc_result","requestId":9,"ok":false,"error":{"kind":"needs_captcha","message":"challenged"}}"#;
		let msg: WireMessage = serde_json::from_str(json).unwrap();
		match msg {
			WireMessage::RpcResult {
				request_id,
				ok,
				result,
				error,
			} => {
				assert_eq!(request_id, 9);
				assert!(!ok);
				assert!(result.is_none());
				assert_eq!(error.unwrap().kind, "needs_captcha");
			}
			other => panic!("expected rpc_result, got {other:?}"),
		}
	}

	#[test]
	fn unknown_type_tag_is_rejected() {
		let json = r#"{"type":"subscribe","channel":"x"}"#;
		assert!(serde_json::from_str::<WireMessage>(json).is_err());
	}

	#[test]
	fn ping_pong_are_bare_tags() {
		assert_eq!(
			serde_json::to_string(&WireMessage::Ping).unwrap(),
			r#"{"type":"ping"}"#
		);
		assert_eq!(
			serde_json::to_string(&WireMessage::Pong).unwrap(),
			r#"{"type":"pong"}"#
		);
	}
}
