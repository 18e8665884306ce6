//! Connected-agent registry.
//!
//! At most one live connection per agent identity. Registering an identity
//! that is already present replaces the incumbent and hands its sender back
//! to the caller so the old socket can be closed with a "replaced" code.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use cw_protocol::WireMessage;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::calls::ConnId;

/// Frame queued for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
	Frame(WireMessage),
	/// Close the socket with the given close code.
	Close(u16),
}

/// One live agent connection.
pub struct AgentEntry {
	pub conn: ConnId,
	pub owner_user: Option<String>,
	pub capabilities: Vec<String>,
	pub tx: mpsc::UnboundedSender<Outbound>,
	pub connected_at: u64,
	last_seen: Arc<AtomicU64>,
}

impl AgentEntry {
	pub fn last_seen_at(&self) -> u64 {
		self.last_seen.load(Ordering::Relaxed)
	}
}

/// Registry of live connections keyed by agent identity.
#[derive(Default)]
pub struct AgentRegistry {
	agents: DashMap<String, AgentEntry>,
}

/// Sender and connection id of a replaced incumbent.
pub struct Replaced {
	pub conn: ConnId,
	pub tx: mpsc::UnboundedSender<Outbound>,
}

impl AgentRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a connection, replacing any incumbent for the identity.
	pub fn insert(
		&self,
		agent_id: &str,
		conn: ConnId,
		owner_user: Option<String>,
		tx: mpsc::UnboundedSender<Outbound>,
	) -> Option<Replaced> {
		let now = now_ts();
		let entry = AgentEntry {
			conn,
			owner_user,
			capabilities: Vec::new(),
			tx,
			connected_at: now,
			last_seen: Arc::new(AtomicU64::new(now)),
		};
		self.agents
			.insert(agent_id.to_string(), entry)
			.map(|old| Replaced {
				conn: old.conn,
				tx: old.tx,
			})
	}

	/// Removes the identity only when `conn` is still its live connection.
	/// A replaced connection's teardown must not evict its replacement.
	pub fn remove_if_current(&self, agent_id: &str, conn: ConnId) -> bool {
		self.agents
			.remove_if(agent_id, |_, entry| entry.conn == conn)
			.is_some()
	}

	/// Records traffic from the agent (any inbound frame counts).
	pub fn touch(&self, agent_id: &str) {
		if let Some(entry) = self.agents.get(agent_id) {
			entry.last_seen.store(now_ts(), Ordering::Relaxed);
		}
	}

	/// Stores the capability list announced in a hello frame.
	pub fn set_capabilities(&self, agent_id: &str, capabilities: Vec<String>) {
		if let Some(mut entry) = self.agents.get_mut(agent_id) {
			entry.capabilities = capabilities;
		}
	}

	/// Returns the live connection and sender for an identity.
	pub fn sender(&self, agent_id: &str) -> Option<(ConnId, mpsc::UnboundedSender<Outbound>)> {
		self.agents
			.get(agent_id)
			.map(|e| (e.conn, e.tx.clone()))
	}

	/// Snapshot accessor for status displays and the liveness sweep.
	pub fn for_each<F: FnMut(&str, &AgentEntry)>(&self, mut f: F) {
		for entry in self.agents.iter() {
			f(entry.key(), entry.value());
		}
	}

	pub fn contains(&self, agent_id: &str) -> bool {
		self.agents.contains_key(agent_id)
	}

	pub fn len(&self) -> usize {
		self.agents.len()
	}

	pub fn is_empty(&self) -> bool {
		self.agents.is_empty()
	}
}

pub(crate) fn now_ts() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}
