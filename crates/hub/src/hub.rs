//! Connection-agnostic hub state machine.
//!
//! [`Hub`] ties the registry and the call table together behind three
//! entry points the transport layer drives: [`Hub::connect`],
//! [`Hub::handle_frame`], and [`Hub::disconnect`]. The axum endpoint in
//! [`crate::server`] is a thin adapter over these, which keeps every
//! ordering and at-most-once property testable without a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cw_protocol::{CLOSE_REPLACED, CLOSE_STALE, WireMessage};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::calls::{CallTable, ConnId, ProgressFn};
use crate::error::{HubError, Result};
use crate::pairing::PairingStore;
use crate::registry::{AgentRegistry, Outbound, now_ts};

/// Tunables for the hub.
pub struct HubConfig {
	/// Fleet-wide static agent credential; `None` requires pairing.
	pub shared_credential: Option<String>,
	/// How often the liveness sweep pings every connection.
	pub ping_interval: Duration,
	/// Silence threshold before a connection is considered stale.
	pub stale_after: Duration,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			shared_credential: None,
			ping_interval: Duration::from_secs(30),
			stale_after: Duration::from_secs(90),
		}
	}
}

/// Options for a single remote call.
pub struct CallOptions {
	pub timeout: Duration,
	pub on_progress: Option<ProgressFn>,
}

impl Default for CallOptions {
	fn default() -> Self {
		Self {
			// Remote scrapes are long-running by design; this bounds the
			// coordinator-side wait, not the agent's work.
			timeout: Duration::from_secs(300),
			on_progress: None,
		}
	}
}

/// Snapshot of one connected agent for status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
	pub agent_id: String,
	pub owner_user: Option<String>,
	pub capabilities: Vec<String>,
	pub connected_at: u64,
	pub last_seen_at: u64,
}

/// Handle returned to the transport for a freshly accepted connection.
pub struct ConnHandle {
	pub conn: ConnId,
	/// Frames the transport must write to the socket.
	pub rx: mpsc::UnboundedReceiver<Outbound>,
}

/// The coordinator-side agent hub.
pub struct Hub {
	registry: AgentRegistry,
	calls: CallTable,
	pairing: PairingStore,
	next_conn: AtomicU64,
	config: HubConfig,
}

impl Hub {
	pub fn new(config: HubConfig) -> Arc<Self> {
		let pairing = PairingStore::new(config.shared_credential.clone());
		Arc::new(Self {
			registry: AgentRegistry::new(),
			calls: CallTable::new(),
			pairing,
			next_conn: AtomicU64::new(1),
			config,
		})
	}

	pub fn pairing(&self) -> &PairingStore {
		&self.pairing
	}

	/// Authenticates and registers a connection. An incumbent for the same
	/// identity is closed with [`CLOSE_REPLACED`] and its pending calls are
	/// rejected.
	pub fn connect(&self, agent_id: &str, credential: &str) -> Result<ConnHandle> {
		let owner_user = self.pairing.verify(agent_id, credential)?;

		let conn = ConnId {
			seq: self.next_conn.fetch_add(1, Ordering::SeqCst),
		};
		let (tx, rx) = mpsc::unbounded_channel();
		if let Some(replaced) = self.registry.insert(agent_id, conn, owner_user.clone(), tx) {
			info!(
				target = "cw.hub",
				agent = agent_id,
				"new connection supersedes incumbent"
			);
			let _ = replaced.tx.send(Outbound::Close(CLOSE_REPLACED));
			self.calls.fail_conn(replaced.conn);
		}
		info!(target = "cw.hub", agent = agent_id, owner = ?owner_user, "agent connected");
		Ok(ConnHandle { conn, rx })
	}

	/// Feeds one decoded inbound frame from `agent_id`'s connection.
	pub fn handle_frame(&self, agent_id: &str, conn: ConnId, frame: WireMessage) {
		// Any traffic proves liveness, including pongs.
		self.registry.touch(agent_id);

		match frame {
			WireMessage::Hello {
				capabilities,
				version,
			} => {
				debug!(
					target = "cw.hub",
					agent = agent_id,
					?capabilities,
					version = version.as_deref().unwrap_or("unknown"),
					"hello"
				);
				self.registry.set_capabilities(agent_id, capabilities);
			}
			WireMessage::RpcResult {
				request_id,
				ok,
				result,
				error,
			} => {
				let outcome = if ok {
					Ok(result.unwrap_or(Value::Null))
				} else {
					let err = error.unwrap_or_else(|| {
						cw_protocol::RemoteError::new("unknown", "agent reported failure without detail")
					});
					Err(HubError::Remote {
						kind: err.kind,
						message: err.message,
					})
				};
				self.calls.complete(request_id, outcome);
			}
			WireMessage::RpcProgress {
				request_id,
				progress,
				log,
			} => self.calls.progress(request_id, progress, log),
			WireMessage::Ping => {
				if let Some((current, tx)) = self.registry.sender(agent_id) {
					if current == conn {
						let _ = tx.send(Outbound::Frame(WireMessage::Pong));
					}
				}
			}
			WireMessage::Pong => {}
			WireMessage::Rpc { method, .. } => {
				// Agents never originate calls toward the coordinator.
				warn!(target = "cw.hub", agent = agent_id, method, "unexpected inbound rpc frame");
			}
		}
	}

	/// Tears down a closed connection: deregisters it (unless it was
	/// already replaced) and rejects the calls it owned.
	pub fn disconnect(&self, agent_id: &str, conn: ConnId) {
		let was_current = self.registry.remove_if_current(agent_id, conn);
		let rejected = self.calls.fail_conn(conn);
		info!(
			target = "cw.hub",
			agent = agent_id,
			was_current,
			rejected,
			"agent disconnected"
		);
	}

	/// Invokes `method` on the named agent and awaits its terminal result.
	pub async fn call(
		&self,
		agent_id: &str,
		method: &str,
		params: Value,
		opts: CallOptions,
	) -> Result<Value> {
		let (conn, tx) = self
			.registry
			.sender(agent_id)
			.ok_or_else(|| HubError::NotConnected(agent_id.to_string()))?;

		let (request_id, rx) = self.calls.register(agent_id, conn, method, opts.on_progress);
		debug!(
			target = "cw.hub",
			agent = agent_id,
			method,
			request_id,
			"dispatching rpc"
		);

		let frame = WireMessage::Rpc {
			request_id,
			method: method.to_string(),
			params,
		};
		if tx.send(Outbound::Frame(frame)).is_err() {
			self.calls.abandon(request_id);
			return Err(HubError::NotConnected(agent_id.to_string()));
		}

		match tokio::time::timeout(opts.timeout, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(HubError::ChannelClosed),
			Err(_) => {
				// Remove the correlation entry so the eventual late result
				// is discarded rather than delivered twice.
				self.calls.abandon(request_id);
				Err(HubError::Timeout {
					method: method.to_string(),
					ms: opts.timeout.as_millis() as u64,
				})
			}
		}
	}

	/// Lists connected agents for status output and dispatch routing.
	pub fn agents(&self) -> Vec<AgentInfo> {
		let mut out = Vec::new();
		self.registry.for_each(|id, entry| {
			out.push(AgentInfo {
				agent_id: id.to_string(),
				owner_user: entry.owner_user.clone(),
				capabilities: entry.capabilities.clone(),
				connected_at: entry.connected_at,
				last_seen_at: entry.last_seen_at(),
			});
		});
		out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
		out
	}

	pub fn is_connected(&self, agent_id: &str) -> bool {
		self.registry.contains(agent_id)
	}

	/// Runs the liveness sweep until the hub is dropped: ping everyone on
	/// the interval, drop connections that stayed silent past the
	/// threshold - unless they own an in-flight call, since a long remote
	/// operation legitimately produces no hub-level traffic.
	pub async fn run_liveness(self: Arc<Self>) {
		let mut ticker = tokio::time::interval(self.config.ping_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			self.sweep_once();
		}
	}

	/// One liveness pass, separated out for tests.
	pub fn sweep_once(&self) {
		let stale_cutoff = now_ts().saturating_sub(self.config.stale_after.as_secs());
		let mut stale: Vec<(String, ConnId)> = Vec::new();
		self.registry.for_each(|id, entry| {
			if entry.last_seen_at() < stale_cutoff && !self.calls.has_pending(entry.conn) {
				stale.push((id.to_string(), entry.conn));
			} else {
				let _ = entry.tx.send(Outbound::Frame(WireMessage::Ping));
			}
		});
		for (agent_id, conn) in stale {
			warn!(target = "cw.hub", agent = %agent_id, "dropping stale connection");
			if let Some((current, tx)) = self.registry.sender(&agent_id) {
				if current == conn {
					let _ = tx.send(Outbound::Close(CLOSE_STALE));
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use cw_protocol::{Progress, RemoteError};

	use super::*;

	fn hub() -> Arc<Hub> {
		Hub::new(HubConfig {
			shared_credential: Some("secret".into()),
			..Default::default()
		})
	}

	fn short_call(ms: u64) -> CallOptions {
		CallOptions {
			timeout: Duration::from_millis(ms),
			on_progress: None,
		}
	}

	async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Outbound {
		tokio::time::timeout(Duration::from_secs(1), rx.recv())
			.await
			.expect("frame expected")
			.expect("channel open")
	}

	#[tokio::test]
	async fn call_to_disconnected_identity_rejects_immediately() {
		let hub = hub();
		let err = hub
			.call("ghost", "cart.collect", Value::Null, CallOptions::default())
			.await
			.unwrap_err();
		assert!(matches!(err, HubError::NotConnected(id) if id == "ghost"));
	}

	#[tokio::test]
	async fn result_after_timeout_is_discarded() {
		let hub = hub();
		let handle = hub.connect("a1", "secret").unwrap();

		let err = hub
			.call("a1", "cart.collect", Value::Null, short_call(20))
			.await
			.unwrap_err();
		assert!(matches!(err, HubError::Timeout { .. }));

		// The agent answers late; nothing must blow up and nothing is
		// delivered twice.
		hub.handle_frame(
			"a1",
			handle.conn,
			WireMessage::RpcResult {
				request_id: 1,
				ok: true,
				result: Some(Value::Null),
				error: None,
			},
		);
	}

	#[tokio::test]
	async fn successful_round_trip_with_progress() {
		let hub = hub();
		let mut handle = hub.connect("a1", "secret").unwrap();

		let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
		let seen2 = Arc::clone(&seen);
		let opts = CallOptions {
			timeout: Duration::from_secs(1),
			on_progress: Some(Arc::new(move |p: Progress, _| {
				seen2.lock().push(p.current);
			})),
		};

		let hub2 = Arc::clone(&hub);
		let call = tokio::spawn(async move {
			hub2.call("a1", "cart.collect", serde_json::json!({}), opts).await
		});

		// Transport side: read the rpc frame, stream progress, then answer.
		let request_id = match next_frame(&mut handle.rx).await {
			Outbound::Frame(WireMessage::Rpc { request_id, method, .. }) => {
				assert_eq!(method, "cart.collect");
				request_id
			}
			other => panic!("expected rpc frame, got {other:?}"),
		};
		hub.handle_frame(
			"a1",
			handle.conn,
			WireMessage::RpcProgress {
				request_id,
				progress: Progress {
					total: 2,
					current: 1,
					success: 1,
					failed: 0,
				},
				log: None,
			},
		);
		hub.handle_frame(
			"a1",
			handle.conn,
			WireMessage::RpcResult {
				request_id,
				ok: true,
				result: Some(serde_json::json!({"items": []})),
				error: None,
			},
		);

		let value = call.await.unwrap().unwrap();
		assert_eq!(value["items"], serde_json::json!([]));
		assert_eq!(*seen.lock(), vec![1]);
	}

	#[tokio::test]
	async fn remote_error_surfaces_kind() {
		let hub = hub();
		let mut handle = hub.connect("a1", "secret").unwrap();

		let hub2 = Arc::clone(&hub);
		let call = tokio::spawn(async move {
			hub2.call("a1", "cart.collect", Value::Null, short_call(1000)).await
		});

		let request_id = match next_frame(&mut handle.rx).await {
			Outbound::Frame(WireMessage::Rpc { request_id, .. }) => request_id,
			other => panic!("expected rpc frame, got {other:?}"),
		};
		hub.handle_frame(
			"a1",
			handle.conn,
			WireMessage::RpcResult {
				request_id,
				ok: false,
				result: None,
				error: Some(RemoteError::new("needs_captcha", "challenged")),
			},
		);

		let err = call.await.unwrap().unwrap_err();
		assert!(matches!(err, HubError::Remote { kind, .. } if kind == "needs_captcha"));
	}

	#[tokio::test]
	async fn replacement_closes_incumbent_and_rejects_its_calls_once() {
		let hub = hub();
		let mut first = hub.connect("a1", "secret").unwrap();

		let hub2 = Arc::clone(&hub);
		let call = tokio::spawn(async move {
			hub2.call("a1", "cart.collect", Value::Null, short_call(2000)).await
		});
		// Wait until the call is actually in flight on the first conn.
		let first_req = match next_frame(&mut first.rx).await {
			Outbound::Frame(WireMessage::Rpc { request_id, .. }) => request_id,
			other => panic!("expected rpc frame, got {other:?}"),
		};

		let _second = hub.connect("a1", "secret").unwrap();

		// Incumbent gets the distinguishable replaced close code...
		let mut saw_replaced = false;
		while let Ok(frame) = first.rx.try_recv() {
			if matches!(frame, Outbound::Close(code) if code == CLOSE_REPLACED) {
				saw_replaced = true;
			}
		}
		assert!(saw_replaced, "incumbent must see CLOSE_REPLACED");

		// ...and its in-flight call rejects with a disconnect error.
		let err = call.await.unwrap().unwrap_err();
		assert!(matches!(err, HubError::Disconnected));

		// The old socket's teardown must not evict the replacement, and a
		// late result on the old correlation id is discarded.
		hub.disconnect("a1", first.conn);
		assert!(hub.is_connected("a1"));
		hub.handle_frame(
			"a1",
			first.conn,
			WireMessage::RpcResult {
				request_id: first_req,
				ok: true,
				result: None,
				error: None,
			},
		);
	}

	#[tokio::test]
	async fn ping_frames_get_pong_replies() {
		let hub = hub();
		let mut handle = hub.connect("a1", "secret").unwrap();
		hub.handle_frame("a1", handle.conn, WireMessage::Ping);
		match next_frame(&mut handle.rx).await {
			Outbound::Frame(WireMessage::Pong) => {}
			other => panic!("expected pong, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn sweep_pings_live_connections() {
		let hub = hub();
		let mut handle = hub.connect("a1", "secret").unwrap();
		hub.sweep_once();
		match next_frame(&mut handle.rx).await {
			Outbound::Frame(WireMessage::Ping) => {}
			other => panic!("expected ping, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn bad_credential_is_rejected() {
		let hub = hub();
		assert!(matches!(hub.connect("a1", "wrong"), Err(HubError::Auth(_))));
	}
}
