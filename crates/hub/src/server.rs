//! Axum WebSocket endpoint feeding the hub.
//!
//! Thin transport adapter: authenticate at upgrade time from headers or
//! query parameters, then shuttle frames between the socket and
//! [`Hub::handle_frame`] / the connection's outbound queue. All protocol
//! decisions live in [`crate::hub`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use cw_protocol::{
	CLOSE_AUTH_REJECTED, CLOSE_REPLACED, CLOSE_STALE, PairNewRequest, PairRedeemRequest,
	PairRedeemResponse, PairingCode, WireMessage,
};
use futures_util::{SinkExt, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::calls::ConnId;
use crate::hub::Hub;
use crate::registry::Outbound;

/// Header carrying the agent identity at connection establishment.
pub const AGENT_ID_HEADER: &str = "x-cartwatch-agent";
/// Header carrying the agent credential (token or shared secret).
pub const AGENT_KEY_HEADER: &str = "x-cartwatch-key";

/// WebSocket path agents connect to.
pub const AGENTS_WS_PATH: &str = "/agents/ws";

/// Builds the hub's HTTP surface: the agent WebSocket, the pairing
/// redemption endpoint, and the status listing.
pub fn hub_router(hub: Arc<Hub>) -> Router {
	Router::new()
		.route(AGENTS_WS_PATH, get(agent_upgrade))
		.route("/agents/pair", post(redeem_pairing))
		.route("/agents/pair/new", post(new_pairing))
		.route("/agents", get(list_agents))
		.with_state(hub)
}

async fn agent_upgrade(
	ws: WebSocketUpgrade,
	headers: HeaderMap,
	Query(query): Query<HashMap<String, String>>,
	State(hub): State<Arc<Hub>>,
) -> Response {
	// Auth is carried out-of-band: headers preferred, query accepted for
	// clients that cannot set headers.
	let agent_id = header_value(&headers, AGENT_ID_HEADER)
		.or_else(|| query.get("agent").cloned());
	let credential = header_value(&headers, AGENT_KEY_HEADER)
		.or_else(|| query.get("key").cloned());

	let (Some(agent_id), Some(credential)) = (agent_id, credential) else {
		return (StatusCode::UNAUTHORIZED, "missing agent identity or credential").into_response();
	};

	ws.on_upgrade(move |socket| handle_agent_socket(socket, hub, agent_id, credential))
}

async fn handle_agent_socket(socket: WebSocket, hub: Arc<Hub>, agent_id: String, credential: String) {
	let (mut ws_tx, mut ws_rx) = socket.split();

	let handle = match hub.connect(&agent_id, &credential) {
		Ok(handle) => handle,
		Err(err) => {
			warn!(target = "cw.hub", agent = %agent_id, error = %err, "rejecting connection");
			let _ = ws_tx
				.send(Message::Close(Some(CloseFrame {
					code: CLOSE_AUTH_REJECTED,
					reason: "auth rejected".into(),
				})))
				.await;
			return;
		}
	};
	let conn = handle.conn;

	let mut outbound = UnboundedReceiverStream::new(handle.rx);
	let writer = tokio::spawn(async move {
		while let Some(frame) = outbound.next().await {
			let msg = match frame {
				Outbound::Frame(wire) => match serde_json::to_string(&wire) {
					Ok(json) => Message::Text(json.into()),
					Err(err) => {
						warn!(target = "cw.hub", error = %err, "failed to encode frame");
						continue;
					}
				},
				Outbound::Close(code) => {
					let _ = ws_tx
						.send(Message::Close(Some(CloseFrame {
							code,
							reason: close_reason(code).into(),
						})))
						.await;
					break;
				}
			};
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => match serde_json::from_str::<WireMessage>(&text) {
				Ok(frame) => hub.handle_frame(&agent_id, conn, frame),
				Err(err) => {
					debug!(target = "cw.hub", agent = %agent_id, error = %err, "undecodable frame ignored");
				}
			},
			Ok(Message::Close(_)) => break,
			// Socket-level ping/pong is handled by axum; it still proves
			// liveness.
			Ok(Message::Ping(_) | Message::Pong(_)) => hub.handle_frame(&agent_id, conn, WireMessage::Pong),
			Ok(Message::Binary(_)) => {
				debug!(target = "cw.hub", agent = %agent_id, "binary frame ignored");
			}
			Err(err) => {
				debug!(target = "cw.hub", agent = %agent_id, error = %err, "socket error");
				break;
			}
		}
	}

	hub.disconnect(&agent_id, conn);
	writer.abort();
}

async fn redeem_pairing(
	State(hub): State<Arc<Hub>>,
	Json(req): Json<PairRedeemRequest>,
) -> Json<PairRedeemResponse> {
	match hub.pairing().redeem(&req.code, &req.agent_id) {
		Ok((token, owner_user)) => Json(PairRedeemResponse::Paired { token, owner_user }),
		Err(err) => Json(PairRedeemResponse::Rejected {
			reason: err.to_string(),
		}),
	}
}

async fn new_pairing(
	State(hub): State<Arc<Hub>>,
	Json(req): Json<PairNewRequest>,
) -> Json<PairingCode> {
	Json(hub.pairing().issue(&req.owner_user))
}

async fn list_agents(State(hub): State<Arc<Hub>>) -> Response {
	Json(hub.agents()).into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
	headers
		.get(name)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
}

fn close_reason(code: u16) -> &'static str {
	match code {
		CLOSE_REPLACED => "replaced",
		CLOSE_STALE => "stale",
		CLOSE_AUTH_REJECTED => "auth rejected",
		_ => "closing",
	}
}
