//! Cooperative pause/resume rendezvous between account operations.
//!
//! A short operation (read the cart) can borrow the account's session from
//! a long one (bulk add-to-cart) without killing it: the long operation
//! polls for a pause request and, at a safe point between atomic steps,
//! parks itself until resumed. Best-effort by design - when no safe point
//! arrives within the requester's timeout, the short operation proceeds
//! without exclusivity rather than deadlocking.
//!
//! The waiter lists of the original callback formulation are watch
//! channels here: broadcastable, one-shot per cycle, reset when the bulk
//! operation ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Per-account rendezvous state.
struct Control {
	add_in_progress: bool,
	pause_requested: bool,
	paused: bool,
	/// Flips true when the long operation parks at a safe point.
	paused_tx: watch::Sender<bool>,
	/// Flips true when the short operation hands the session back.
	resumed_tx: watch::Sender<bool>,
}

impl Control {
	fn new() -> Self {
		let (paused_tx, _) = watch::channel(false);
		let (resumed_tx, _) = watch::channel(false);
		Self {
			add_in_progress: false,
			pause_requested: false,
			paused: false,
			paused_tx,
			resumed_tx,
		}
	}
}

/// Coordinates pause/resume rendezvous per account, owned by the process
/// that owns the sessions (explicit state, injected where needed).
#[derive(Default)]
pub struct PauseCoordinator {
	controls: Mutex<HashMap<String, Arc<Mutex<Control>>>>,
}

impl PauseCoordinator {
	pub fn new() -> Self {
		Self::default()
	}

	fn control(&self, account_id: &str) -> Arc<Mutex<Control>> {
		Arc::clone(
			self.controls
				.lock()
				.entry(account_id.to_string())
				.or_insert_with(|| Arc::new(Mutex::new(Control::new()))),
		)
	}

	/// Marks a bulk operation as running on the account.
	pub fn start_bulk(&self, account_id: &str) {
		let control = self.control(account_id);
		let mut control = control.lock();
		control.add_in_progress = true;
		control.pause_requested = false;
		control.paused = false;
		control.paused_tx.send_replace(false);
		control.resumed_tx.send_replace(false);
	}

	/// Marks the bulk operation finished, waking any pause requester so it
	/// can stop waiting for a safe point that will never come.
	pub fn end_bulk(&self, account_id: &str) {
		let control = self.control(account_id);
		let mut control = control.lock();
		control.add_in_progress = false;
		control.pause_requested = false;
		control.paused = false;
		// Wake waiters; they observe add_in_progress == false and bail.
		control.paused_tx.send_replace(false);
		control.resumed_tx.send_replace(true);
	}

	/// The long operation polls this between atomic steps.
	pub fn pause_requested(&self, account_id: &str) -> bool {
		let control = self.control(account_id);
		let control = control.lock();
		control.add_in_progress && control.pause_requested
	}

	/// Asks the running bulk operation to pause at its next safe point.
	///
	/// Returns `false` immediately when no bulk operation is running, and
	/// `false` after `timeout` when no safe point arrived in time - the
	/// caller then proceeds without exclusivity. Returns `true` only once
	/// the long operation has actually parked.
	pub async fn request_pause(&self, account_id: &str, timeout: Duration) -> bool {
		let control = self.control(account_id);
		let mut paused_rx = {
			let mut guard = control.lock();
			if !guard.add_in_progress {
				return false;
			}
			if guard.paused {
				return true;
			}
			guard.pause_requested = true;
			guard.paused_tx.subscribe()
		};

		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			{
				let guard = control.lock();
				if !guard.add_in_progress {
					return false;
				}
				if guard.paused {
					return true;
				}
			}
			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			if remaining.is_zero() {
				// Timed out; withdraw the request so the long operation
				// does not park for nobody.
				let mut guard = control.lock();
				if !guard.paused {
					guard.pause_requested = false;
					return false;
				}
				return true;
			}
			tokio::select! {
				changed = paused_rx.changed() => {
					if changed.is_err() {
						return false;
					}
				}
				_ = tokio::time::sleep(remaining) => {}
			}
		}
	}

	/// Called by the long operation at a safe point after observing a
	/// pause request. Parks the operation's state and releases everyone
	/// waiting in [`request_pause`].
	pub fn notify_paused_at_safe_point(&self, account_id: &str) {
		let control = self.control(account_id);
		let mut control = control.lock();
		if !control.pause_requested {
			return;
		}
		debug!(target = "cw.session", account = account_id, "bulk operation parked at safe point");
		control.paused = true;
		control.resumed_tx.send_replace(false);
		control.paused_tx.send_replace(true);
	}

	/// Hands the session back to the long operation. Returns whether a
	/// pause was actually in effect.
	pub fn resume(&self, account_id: &str) -> bool {
		let control = self.control(account_id);
		let mut control = control.lock();
		if !control.paused {
			return false;
		}
		control.paused = false;
		control.pause_requested = false;
		control.paused_tx.send_replace(false);
		control.resumed_tx.send_replace(true);
		true
	}

	/// Parks the long operation until [`resume`](Self::resume) (or bulk
	/// teardown) releases it.
	pub async fn wait_until_resumed(&self, account_id: &str) {
		let control = self.control(account_id);
		let mut resumed_rx = {
			let guard = control.lock();
			if !guard.paused {
				return;
			}
			guard.resumed_tx.subscribe()
		};
		loop {
			if *resumed_rx.borrow_and_update() {
				return;
			}
			if resumed_rx.changed().await.is_err() {
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn request_without_bulk_returns_false_immediately() {
		let coordinator = PauseCoordinator::new();
		let started = tokio::time::Instant::now();
		assert!(!coordinator.request_pause("acct", Duration::from_secs(5)).await);
		assert!(started.elapsed() < Duration::from_millis(50));
	}

	#[tokio::test]
	async fn request_resolves_true_only_after_safe_point() {
		let coordinator = Arc::new(PauseCoordinator::new());
		coordinator.start_bulk("acct");

		let c2 = Arc::clone(&coordinator);
		let requester = tokio::spawn(async move {
			c2.request_pause("acct", Duration::from_secs(5)).await
		});

		// Long operation notices the request only after it lands.
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!requester.is_finished(), "must not resolve before the safe point");
		assert!(coordinator.pause_requested("acct"));

		coordinator.notify_paused_at_safe_point("acct");
		assert!(requester.await.unwrap());
	}

	#[tokio::test]
	async fn timeout_withdraws_the_request() {
		let coordinator = PauseCoordinator::new();
		coordinator.start_bulk("acct");
		assert!(!coordinator.request_pause("acct", Duration::from_millis(20)).await);
		// The long operation must no longer see a pending request.
		assert!(!coordinator.pause_requested("acct"));
		coordinator.end_bulk("acct");
	}

	#[tokio::test]
	async fn resume_releases_the_parked_operation() {
		let coordinator = Arc::new(PauseCoordinator::new());
		coordinator.start_bulk("acct");

		let c2 = Arc::clone(&coordinator);
		let requester = tokio::spawn(async move {
			c2.request_pause("acct", Duration::from_secs(5)).await
		});
		tokio::time::sleep(Duration::from_millis(10)).await;
		coordinator.notify_paused_at_safe_point("acct");
		assert!(requester.await.unwrap());

		let c3 = Arc::clone(&coordinator);
		let parked = tokio::spawn(async move {
			c3.wait_until_resumed("acct").await;
		});
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(!parked.is_finished(), "long operation stays parked until resume");

		assert!(coordinator.resume("acct"));
		parked.await.unwrap();
		assert!(!coordinator.resume("acct"), "second resume finds nothing paused");
	}

	#[tokio::test]
	async fn bulk_teardown_unblocks_pending_requester() {
		let coordinator = Arc::new(PauseCoordinator::new());
		coordinator.start_bulk("acct");

		let c2 = Arc::clone(&coordinator);
		let requester = tokio::spawn(async move {
			c2.request_pause("acct", Duration::from_secs(5)).await
		});
		tokio::time::sleep(Duration::from_millis(10)).await;
		coordinator.end_bulk("acct");
		assert!(!requester.await.unwrap());
	}

	#[tokio::test]
	async fn safe_point_without_request_is_a_no_op() {
		let coordinator = PauseCoordinator::new();
		coordinator.start_bulk("acct");
		coordinator.notify_paused_at_safe_point("acct");
		assert!(!coordinator.resume("acct"));
		coordinator.end_bulk("acct");
	}
}
