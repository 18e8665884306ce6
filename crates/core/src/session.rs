//! Per-account session ownership.
//!
//! Exactly one live session per account identity. All creation/teardown
//! decisions are serialized behind a single async mutex - not per-account
//! locks - so two concurrent callers can never race each other into
//! building two sessions for the same account.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::page::{PageSession, SessionBackend};

/// Credential material a session is built from.
#[derive(Debug, Clone)]
pub struct Credential {
	/// Serialized cookie jar injected into the fresh browser context.
	pub cookies_json: String,
}

impl Credential {
	/// Stable fingerprint of the material. A session built from one
	/// fingerprint is torn down when the stored credential changes.
	pub fn fingerprint(&self) -> String {
		let digest = Sha256::digest(self.cookies_json.as_bytes());
		// First eight bytes are plenty for an equality check.
		digest[..8].iter().map(|b| format!("{b:02x}")).collect()
	}
}

struct SessionEntry {
	session: Arc<dyn PageSession>,
	fingerprint: String,
	last_used_at: Instant,
}

/// Owns every live session in this process.
pub struct SessionManager {
	backend: Arc<dyn SessionBackend>,
	// One mutex for the whole registry by design intent: serializing all
	// build/teardown decisions is what makes reuse race-free.
	entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
	pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
		Self {
			backend,
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Returns the account's live session, rebuilding it when it is
	/// unhealthy or was built from different credential material.
	pub async fn get_or_create(
		&self,
		account_id: &str,
		credential: &Credential,
	) -> Result<Arc<dyn PageSession>> {
		let fingerprint = credential.fingerprint();
		let mut entries = self.entries.lock().await;

		if let Some(entry) = entries.get_mut(account_id) {
			if entry.fingerprint == fingerprint && entry.session.is_healthy().await {
				debug!(target = "cw.session", account = account_id, "reusing session");
				entry.last_used_at = Instant::now();
				return Ok(Arc::clone(&entry.session));
			}
			let stale = entries.remove(account_id).expect("entry just observed");
			info!(
				target = "cw.session",
				account = account_id,
				credential_changed = stale.fingerprint != fingerprint,
				"rebuilding session"
			);
			stale.session.close().await;
		}

		let session = self.backend.build(account_id, credential).await?;
		entries.insert(
			account_id.to_string(),
			SessionEntry {
				session: Arc::clone(&session),
				fingerprint,
				last_used_at: Instant::now(),
			},
		);
		Ok(session)
	}

	/// Tears down the account's session, if any.
	pub async fn dispose(&self, account_id: &str) {
		let removed = self.entries.lock().await.remove(account_id);
		if let Some(entry) = removed {
			info!(target = "cw.session", account = account_id, "disposing session");
			entry.session.close().await;
		}
	}

	/// Tears down every session (process shutdown).
	pub async fn dispose_all(&self) {
		let drained: Vec<SessionEntry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();
		for entry in drained {
			entry.session.close().await;
		}
	}

	/// Idle age of the account's session, for eviction policies upstream.
	pub async fn idle_for(&self, account_id: &str) -> Option<std::time::Duration> {
		self.entries
			.lock()
			.await
			.get(account_id)
			.map(|e| e.last_used_at.elapsed())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

	use async_trait::async_trait;

	use super::*;
	use crate::error::CoreError;
	use crate::page::{ListingView, CartView};

	#[derive(Default)]
	struct FakeSession {
		healthy: AtomicBool,
		closed: AtomicBool,
	}

	#[async_trait]
	impl PageSession for FakeSession {
		async fn is_healthy(&self) -> bool {
			self.healthy.load(Ordering::SeqCst)
		}
		async fn open_cart(&self) -> Result<Arc<dyn CartView>> {
			Err(CoreError::Page("not implemented".into()))
		}
		async fn open_listing(&self, _url: &str) -> Result<Arc<dyn ListingView>> {
			Err(CoreError::Page("not implemented".into()))
		}
		async fn add_to_cart(&self, _listing_url: &str) -> Result<()> {
			Ok(())
		}
		async fn close(&self) {
			self.closed.store(true, Ordering::SeqCst);
		}
	}

	struct FakeBackend {
		builds: AtomicU32,
		last: parking_lot::Mutex<Option<Arc<FakeSession>>>,
	}

	impl FakeBackend {
		fn new() -> Self {
			Self {
				builds: AtomicU32::new(0),
				last: parking_lot::Mutex::new(None),
			}
		}
	}

	#[async_trait]
	impl SessionBackend for FakeBackend {
		async fn build(&self, _account_id: &str, _credential: &Credential) -> Result<Arc<dyn PageSession>> {
			self.builds.fetch_add(1, Ordering::SeqCst);
			let session = Arc::new(FakeSession {
				healthy: AtomicBool::new(true),
				closed: AtomicBool::new(false),
			});
			*self.last.lock() = Some(Arc::clone(&session));
			Ok(session)
		}
	}

	fn cred(s: &str) -> Credential {
		Credential {
			cookies_json: s.to_string(),
		}
	}

	#[tokio::test]
	async fn healthy_session_is_reused() {
		let backend = Arc::new(FakeBackend::new());
		let mgr = SessionManager::new(Arc::clone(&backend) as Arc<dyn SessionBackend>);

		mgr.get_or_create("acct", &cred("c1")).await.unwrap();
		mgr.get_or_create("acct", &cred("c1")).await.unwrap();
		assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn unhealthy_session_is_rebuilt_and_closed() {
		let backend = Arc::new(FakeBackend::new());
		let mgr = SessionManager::new(Arc::clone(&backend) as Arc<dyn SessionBackend>);

		mgr.get_or_create("acct", &cred("c1")).await.unwrap();
		let first = backend.last.lock().clone().unwrap();
		first.healthy.store(false, Ordering::SeqCst);

		mgr.get_or_create("acct", &cred("c1")).await.unwrap();
		assert_eq!(backend.builds.load(Ordering::SeqCst), 2);
		assert!(first.closed.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn credential_change_forces_rebuild() {
		let backend = Arc::new(FakeBackend::new());
		let mgr = SessionManager::new(Arc::clone(&backend) as Arc<dyn SessionBackend>);

		mgr.get_or_create("acct", &cred("c1")).await.unwrap();
		let first = backend.last.lock().clone().unwrap();

		mgr.get_or_create("acct", &cred("c2")).await.unwrap();
		assert_eq!(backend.builds.load(Ordering::SeqCst), 2);
		assert!(first.closed.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn concurrent_callers_build_exactly_once() {
		let backend = Arc::new(FakeBackend::new());
		let mgr = Arc::new(SessionManager::new(
			Arc::clone(&backend) as Arc<dyn SessionBackend>
		));

		let tasks: Vec<_> = (0..8)
			.map(|_| {
				let mgr = Arc::clone(&mgr);
				tokio::spawn(async move { mgr.get_or_create("acct", &cred("c1")).await })
			})
			.collect();
		for task in tasks {
			task.await.unwrap().unwrap();
		}
		assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn dispose_closes_session() {
		let backend = Arc::new(FakeBackend::new());
		let mgr = SessionManager::new(Arc::clone(&backend) as Arc<dyn SessionBackend>);
		mgr.get_or_create("acct", &cred("c1")).await.unwrap();
		let session = backend.last.lock().clone().unwrap();
		mgr.dispose("acct").await;
		assert!(session.closed.load(Ordering::SeqCst));
		assert!(mgr.idle_for("acct").await.is_none());
	}

	#[test]
	fn fingerprint_is_stable_and_distinguishes_material() {
		assert_eq!(cred("a").fingerprint(), cred("a").fingerprint());
		assert_ne!(cred("a").fingerprint(), cred("b").fingerprint());
	}
}
