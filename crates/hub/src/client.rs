//! Agent-side connector.
//!
//! An agent process opens one WebSocket to the coordinator, announces its
//! capabilities, then serves inbound `rpc` frames by dispatching them to a
//! [`MethodHandler`]. Each call runs in its own task so a long cart scrape
//! does not block keepalive traffic; progress flows back through a
//! [`ProgressReporter`] handed to the handler.
//!
//! Reconnection policy lives with the caller: [`AgentClient::run`] returns
//! a [`ClientExit`] describing why the connection ended, and a "replaced"
//! close must not be retried.

use std::sync::Arc;

use async_trait::async_trait;
use cw_protocol::{CLOSE_AUTH_REJECTED, CLOSE_REPLACED, Progress, RemoteError, WireMessage};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};

use crate::error::{HubError, Result};
use crate::server::{AGENT_ID_HEADER, AGENT_KEY_HEADER};

/// Credential material an agent presents at connection time.
#[derive(Debug, Clone)]
pub struct AgentCredential {
	pub agent_id: String,
	/// Per-agent token from pairing, or the fleet-wide shared secret.
	pub key: String,
}

/// Why [`AgentClient::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
	/// A newer connection for this identity took over. Do not reconnect.
	Replaced,
	/// The coordinator rejected our credential. Do not reconnect.
	AuthRejected,
	/// The connection dropped for any other reason. Reconnecting is fine.
	ConnectionLost,
}

/// Executes one named method on behalf of the coordinator.
#[async_trait]
pub trait MethodHandler: Send + Sync {
	/// Method names this agent announces in its hello frame.
	fn capabilities(&self) -> Vec<String>;

	/// Runs `method`. The error side travels the wire verbatim, so
	/// handlers map their domain errors to stable [`RemoteError`] kinds.
	async fn handle(
		&self,
		method: &str,
		params: Value,
		progress: ProgressReporter,
	) -> std::result::Result<Value, RemoteError>;
}

/// Streams progress frames for one in-flight call.
#[derive(Clone)]
pub struct ProgressReporter {
	request_id: u64,
	tx: mpsc::UnboundedSender<WireMessage>,
}

impl ProgressReporter {
	pub fn report(&self, progress: Progress, log: Option<String>) {
		let _ = self.tx.send(WireMessage::RpcProgress {
			request_id: self.request_id,
			progress,
			log,
		});
	}
}

/// One agent connection to the coordinator.
pub struct AgentClient {
	url: String,
	credential: AgentCredential,
	handler: Arc<dyn MethodHandler>,
}

impl AgentClient {
	pub fn new(url: impl Into<String>, credential: AgentCredential, handler: Arc<dyn MethodHandler>) -> Self {
		Self {
			url: url.into(),
			credential,
			handler,
		}
	}

	/// Connects, serves calls until the connection ends, and reports why.
	pub async fn run(&self) -> Result<ClientExit> {
		let mut request = self
			.url
			.clone()
			.into_client_request()
			.map_err(|e| HubError::Protocol(e.to_string()))?;
		request.headers_mut().insert(
			AGENT_ID_HEADER,
			HeaderValue::from_str(&self.credential.agent_id)
				.map_err(|e| HubError::Protocol(e.to_string()))?,
		);
		request.headers_mut().insert(
			AGENT_KEY_HEADER,
			HeaderValue::from_str(&self.credential.key)
				.map_err(|e| HubError::Protocol(e.to_string()))?,
		);

		let (socket, _) = connect_async(request)
			.await
			.map_err(|e| HubError::Protocol(format!("connect failed: {e}")))?;
		info!(target = "cw.agent", url = %self.url, "connected to coordinator");

		let (mut ws_tx, mut ws_rx) = socket.split();
		let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();

		let _ = out_tx.send(WireMessage::Hello {
			capabilities: self.handler.capabilities(),
			version: Some(env!("CARGO_PKG_VERSION").to_string()),
		});

		let writer = tokio::spawn(async move {
			while let Some(frame) = out_rx.recv().await {
				let Ok(json) = serde_json::to_string(&frame) else {
					continue;
				};
				if ws_tx.send(Message::Text(json)).await.is_err() {
					break;
				}
			}
		});

		let mut exit = ClientExit::ConnectionLost;
		while let Some(msg) = ws_rx.next().await {
			match msg {
				Ok(Message::Text(text)) => {
					match serde_json::from_str::<WireMessage>(&text) {
						Ok(frame) => self.dispatch(frame, &out_tx),
						Err(err) => {
							debug!(target = "cw.agent", error = %err, "undecodable frame ignored");
						}
					}
				}
				Ok(Message::Close(close)) => {
					if let Some(frame) = close {
						let code = u16::from(frame.code);
						if code == CLOSE_REPLACED {
							warn!(target = "cw.agent", "superseded by a newer connection");
							exit = ClientExit::Replaced;
						} else if code == CLOSE_AUTH_REJECTED {
							warn!(target = "cw.agent", "credential rejected");
							exit = ClientExit::AuthRejected;
						}
					}
					break;
				}
				Ok(Message::Ping(_) | Message::Pong(_)) => {}
				Ok(_) => {}
				Err(err) => {
					debug!(target = "cw.agent", error = %err, "socket error");
					break;
				}
			}
		}

		writer.abort();
		Ok(exit)
	}

	fn dispatch(&self, frame: WireMessage, out_tx: &mpsc::UnboundedSender<WireMessage>) {
		match frame {
			WireMessage::Rpc {
				request_id,
				method,
				params,
			} => {
				let handler = Arc::clone(&self.handler);
				let tx = out_tx.clone();
				let reporter = ProgressReporter {
					request_id,
					tx: tx.clone(),
				};
				tokio::spawn(async move {
					debug!(target = "cw.agent", method = %method, request_id, "executing call");
					let outcome = handler.handle(&method, params, reporter).await;
					let frame = match outcome {
						Ok(value) => WireMessage::RpcResult {
							request_id,
							ok: true,
							result: Some(value),
							error: None,
						},
						Err(err) => WireMessage::RpcResult {
							request_id,
							ok: false,
							result: None,
							error: Some(err),
						},
					};
					let _ = tx.send(frame);
				});
			}
			WireMessage::Ping => {
				let _ = out_tx.send(WireMessage::Pong);
			}
			WireMessage::Pong => {}
			other => {
				debug!(target = "cw.agent", ?other, "unexpected frame from coordinator");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Echo;

	#[async_trait]
	impl MethodHandler for Echo {
		fn capabilities(&self) -> Vec<String> {
			vec!["echo".into()]
		}

		async fn handle(
			&self,
			method: &str,
			params: Value,
			progress: ProgressReporter,
		) -> std::result::Result<Value, RemoteError> {
			progress.report(
				Progress {
					total: 1,
					current: 1,
					success: 1,
					failed: 0,
				},
				None,
			);
			if method == "echo" {
				Ok(params)
			} else {
				Err(RemoteError::new("unsupported", format!("no such method {method}")))
			}
		}
	}

	#[tokio::test]
	async fn dispatch_answers_rpc_with_progress_then_result() {
		let client = AgentClient::new(
			"ws://localhost:0/agents/ws",
			AgentCredential {
				agent_id: "a1".into(),
				key: "k".into(),
			},
			Arc::new(Echo),
		);
		let (tx, mut rx) = mpsc::unbounded_channel();

		client.dispatch(
			WireMessage::Rpc {
				request_id: 5,
				method: "echo".into(),
				params: serde_json::json!({"x": 1}),
			},
			&tx,
		);

		let first = rx.recv().await.unwrap();
		assert!(matches!(first, WireMessage::RpcProgress { request_id: 5, .. }));
		let second = rx.recv().await.unwrap();
		match second {
			WireMessage::RpcResult {
				request_id,
				ok,
				result,
				..
			} => {
				assert_eq!(request_id, 5);
				assert!(ok);
				assert_eq!(result.unwrap()["x"], 1);
			}
			other => panic!("expected result, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn dispatch_reports_unsupported_methods_as_remote_error() {
		let client = AgentClient::new(
			"ws://localhost:0/agents/ws",
			AgentCredential {
				agent_id: "a1".into(),
				key: "k".into(),
			},
			Arc::new(Echo),
		);
		let (tx, mut rx) = mpsc::unbounded_channel();
		client.dispatch(
			WireMessage::Rpc {
				request_id: 6,
				method: "cart.collect".into(),
				params: Value::Null,
			},
			&tx,
		);
		// Progress still fires first in this handler; take frames until
		// the terminal result.
		loop {
			match rx.recv().await.unwrap() {
				WireMessage::RpcResult { ok, error, .. } => {
					assert!(!ok);
					assert_eq!(error.unwrap().kind, "unsupported");
					break;
				}
				WireMessage::RpcProgress { .. } => continue,
				other => panic!("unexpected frame {other:?}"),
			}
		}
	}

	#[tokio::test]
	async fn ping_gets_pong() {
		let client = AgentClient::new(
			"ws://localhost:0/agents/ws",
			AgentCredential {
				agent_id: "a1".into(),
				key: "k".into(),
			},
			Arc::new(Echo),
		);
		let (tx, mut rx) = mpsc::unbounded_channel();
		client.dispatch(WireMessage::Ping, &tx);
		assert!(matches!(rx.recv().await.unwrap(), WireMessage::Pong));
	}
}
