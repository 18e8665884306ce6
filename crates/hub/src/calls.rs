//! In-flight call correlation.
//!
//! Every coordinator-initiated call gets a sequential request id and a slot
//! in the [`CallTable`]. The slot holds the oneshot completion sender, the
//! optional progress callback, and the connection that owns the call. A
//! slot is removed on exactly one of: terminal result, timeout, or owning
//! connection loss - whichever comes first. A result arriving for a
//! removed id is silently discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cw_protocol::Progress;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{HubError, Result};

/// Callback invoked for each progress frame of a call.
pub type ProgressFn = Arc<dyn Fn(Progress, Option<String>) + Send + Sync>;

/// Identifies one physical connection of one agent identity. A replaced
/// connection keeps its seq, so calls it owned can be failed without
/// touching calls issued on the replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
	pub seq: u64,
}

struct PendingCall {
	agent_id: String,
	conn: ConnId,
	method: String,
	tx: oneshot::Sender<Result<Value>>,
	on_progress: Option<ProgressFn>,
}

/// Correlation table for in-flight calls.
pub struct CallTable {
	next_id: AtomicU64,
	pending: Mutex<HashMap<u64, PendingCall>>,
}

impl Default for CallTable {
	fn default() -> Self {
		Self::new()
	}
}

impl CallTable {
	pub fn new() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			pending: Mutex::new(HashMap::new()),
		}
	}

	/// Registers a new call and returns its request id plus the receiver
	/// for its terminal result.
	pub fn register(
		&self,
		agent_id: &str,
		conn: ConnId,
		method: &str,
		on_progress: Option<ProgressFn>,
	) -> (u64, oneshot::Receiver<Result<Value>>) {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(
			id,
			PendingCall {
				agent_id: agent_id.to_string(),
				conn,
				method: method.to_string(),
				tx,
				on_progress,
			},
		);
		(id, rx)
	}

	/// Delivers the terminal result for `id`. Returns `false` when the id
	/// is unknown - already completed, timed out, or never issued - in
	/// which case the result is discarded.
	pub fn complete(&self, id: u64, result: Result<Value>) -> bool {
		let Some(call) = self.pending.lock().remove(&id) else {
			tracing::debug!(target = "cw.hub", id, "late result discarded");
			return false;
		};
		let _ = call.tx.send(result);
		true
	}

	/// Routes a progress frame to the call's callback, if any. Unknown ids
	/// are ignored (the call may have just timed out).
	pub fn progress(&self, id: u64, progress: Progress, log: Option<String>) {
		let cb = {
			let pending = self.pending.lock();
			pending.get(&id).and_then(|c| c.on_progress.clone())
		};
		if let Some(cb) = cb {
			cb(progress, log);
		}
	}

	/// Removes a call without completing it (timeout path). Returns the
	/// method name when the call was still pending.
	pub fn abandon(&self, id: u64) -> Option<String> {
		self.pending.lock().remove(&id).map(|c| c.method)
	}

	/// Rejects every call owned by `conn`. Each is completed exactly once;
	/// calls already resolved are untouched.
	pub fn fail_conn(&self, conn: ConnId) -> usize {
		let drained: Vec<PendingCall> = {
			let mut pending = self.pending.lock();
			let ids: Vec<u64> = pending
				.iter()
				.filter(|(_, c)| c.conn == conn)
				.map(|(id, _)| *id)
				.collect();
			ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
		};
		let n = drained.len();
		for call in drained {
			tracing::debug!(
				target = "cw.hub",
				agent = %call.agent_id,
				method = %call.method,
				"rejecting call on disconnect"
			);
			let _ = call.tx.send(Err(HubError::Disconnected));
		}
		n
	}

	/// True when `conn` owns at least one in-flight call. Used by the
	/// liveness sweep: a stale connection with pending work is spared.
	pub fn has_pending(&self, conn: ConnId) -> bool {
		self.pending.lock().values().any(|c| c.conn == conn)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn table() -> CallTable {
		CallTable::new()
	}

	#[tokio::test]
	async fn complete_resolves_receiver() {
		let t = table();
		let (id, rx) = t.register("a1", ConnId { seq: 1 }, "cart.collect", None);
		assert!(t.complete(id, Ok(serde_json::json!({"ok": true}))));
		let value = rx.await.unwrap().unwrap();
		assert_eq!(value["ok"], true);
	}

	#[test]
	fn late_result_is_discarded() {
		let t = table();
		let (id, rx) = t.register("a1", ConnId { seq: 1 }, "cart.collect", None);
		assert_eq!(t.abandon(id).as_deref(), Some("cart.collect"));
		// Receiver has been dropped with the call; a late completion must
		// report discard rather than resolving anything.
		drop(rx);
		assert!(!t.complete(id, Ok(Value::Null)));
	}

	#[tokio::test]
	async fn fail_conn_rejects_exactly_once() {
		let t = table();
		let conn = ConnId { seq: 7 };
		let (id, rx) = t.register("a1", conn, "cart.collect", None);
		assert_eq!(t.fail_conn(conn), 1);
		assert!(matches!(rx.await.unwrap(), Err(HubError::Disconnected)));
		// Second sweep and a late result both find nothing.
		assert_eq!(t.fail_conn(conn), 0);
		assert!(!t.complete(id, Ok(Value::Null)));
	}

	#[tokio::test]
	async fn fail_conn_spares_other_connections() {
		let t = table();
		let old = ConnId { seq: 1 };
		let new = ConnId { seq: 2 };
		let (_, old_rx) = t.register("a1", old, "cart.collect", None);
		let (new_id, new_rx) = t.register("a1", new, "cart.collect", None);
		t.fail_conn(old);
		assert!(old_rx.await.unwrap().is_err());
		assert!(t.complete(new_id, Ok(Value::Null)));
		assert!(new_rx.await.unwrap().is_ok());
	}

	#[test]
	fn progress_reaches_callback_until_completion() {
		let t = table();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let seen2 = Arc::clone(&seen);
		let cb: ProgressFn = Arc::new(move |p, log| {
			seen2.lock().push((p.current, log));
		});
		let (id, _rx) = t.register("a1", ConnId { seq: 1 }, "cart.add", Some(cb));

		t.progress(
			id,
			Progress {
				total: 2,
				current: 1,
				success: 1,
				failed: 0,
			},
			Some("one".into()),
		);
		t.complete(id, Ok(Value::Null));
		t.progress(id, Progress::default(), Some("late".into()));

		let seen = seen.lock();
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0], (1, Some("one".into())));
	}

	#[test]
	fn has_pending_tracks_conn_ownership() {
		let t = table();
		let conn = ConnId { seq: 3 };
		assert!(!t.has_pending(conn));
		let (id, _rx) = t.register("a1", conn, "cart.collect", None);
		assert!(t.has_pending(conn));
		t.complete(id, Ok(Value::Null));
		assert!(!t.has_pending(conn));
	}
}
