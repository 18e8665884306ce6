//! Bulk add-to-cart driver.
//!
//! The long-running operation the pause coordinator protects. Adds are
//! atomic steps; between any two of them is a safe point where a pause
//! request is honored: the driver parks, a competing short operation
//! borrows the session, and the driver continues after resume.

use cw_protocol::Progress;

use crate::error::Result;
use crate::page::PageSession;
use crate::pause::PauseCoordinator;

/// Callback invoked after every attempted add.
pub type BulkProgressFn<'a> = dyn FnMut(Progress, &str) + Send + 'a;

/// Adds each listing to the account's cart, honoring pause requests at
/// safe points. Individual add failures are counted, not fatal.
pub async fn bulk_add(
	session: &dyn PageSession,
	pause: &PauseCoordinator,
	account_id: &str,
	listing_urls: &[String],
	on_progress: &mut BulkProgressFn<'_>,
) -> Result<Progress> {
	pause.start_bulk(account_id);
	let result = run(session, pause, account_id, listing_urls, on_progress).await;
	pause.end_bulk(account_id);
	result
}

async fn run(
	session: &dyn PageSession,
	pause: &PauseCoordinator,
	account_id: &str,
	listing_urls: &[String],
	on_progress: &mut BulkProgressFn<'_>,
) -> Result<Progress> {
	let mut progress = Progress {
		total: listing_urls.len() as u64,
		..Default::default()
	};

	for url in listing_urls {
		// Safe point: nothing is half-done between adds.
		if pause.pause_requested(account_id) {
			pause.notify_paused_at_safe_point(account_id);
			pause.wait_until_resumed(account_id).await;
		}

		progress.current += 1;
		match session.add_to_cart(url).await {
			Ok(()) => {
				progress.success += 1;
				on_progress(progress, url);
			}
			Err(err) => {
				// Risk signals end the whole run: retrying against a
				// challenged session invites account-level penalties.
				if err.is_risk_signal() {
					return Err(err);
				}
				tracing::warn!(target = "cw.cart", account = account_id, url = %url, error = %err, "add failed");
				progress.failed += 1;
				on_progress(progress, url);
			}
		}
	}

	Ok(progress)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::time::Duration;

	use async_trait::async_trait;

	use super::*;
	use crate::error::CoreError;
	use crate::page::{ListingView, CartView};

	struct FakeSession {
		adds: AtomicU32,
		fail_on: Option<u32>,
		risk_on: Option<u32>,
		delay: Duration,
	}

	impl FakeSession {
		fn new() -> Self {
			Self {
				adds: AtomicU32::new(0),
				fail_on: None,
				risk_on: None,
				delay: Duration::ZERO,
			}
		}
	}

	#[async_trait]
	impl PageSession for FakeSession {
		async fn is_healthy(&self) -> bool {
			true
		}
		async fn open_cart(&self) -> Result<Arc<dyn CartView>> {
			Err(CoreError::Page("unused".into()))
		}
		async fn open_listing(&self, _url: &str) -> Result<Arc<dyn ListingView>> {
			Err(CoreError::Page("unused".into()))
		}
		async fn add_to_cart(&self, _listing_url: &str) -> Result<()> {
			tokio::time::sleep(self.delay).await;
			let n = self.adds.fetch_add(1, Ordering::SeqCst) + 1;
			if self.risk_on == Some(n) {
				return Err(CoreError::NeedsCaptcha);
			}
			if self.fail_on == Some(n) {
				return Err(CoreError::Page("out of stock".into()));
			}
			Ok(())
		}
		async fn close(&self) {}
	}

	fn urls(n: usize) -> Vec<String> {
		(0..n).map(|i| format!("https://shop.example/l{i}")).collect()
	}

	#[tokio::test]
	async fn counts_successes_and_failures() {
		let mut session = FakeSession::new();
		session.fail_on = Some(2);
		let pause = PauseCoordinator::new();
		let progress = bulk_add(&session, &pause, "acct", &urls(3), &mut |_, _| {})
			.await
			.unwrap();
		assert_eq!(progress.total, 3);
		assert_eq!(progress.success, 2);
		assert_eq!(progress.failed, 1);
	}

	#[tokio::test]
	async fn risk_signal_aborts_and_ends_bulk() {
		let mut session = FakeSession::new();
		session.risk_on = Some(2);
		let pause = PauseCoordinator::new();
		let err = bulk_add(&session, &pause, "acct", &urls(5), &mut |_, _| {})
			.await
			.unwrap_err();
		assert!(matches!(err, CoreError::NeedsCaptcha));
		// Teardown ran: a new pause request must bail immediately.
		assert!(!pause.request_pause("acct", Duration::from_secs(1)).await);
	}

	#[tokio::test]
	async fn pause_request_is_honored_between_adds() {
		let mut session = FakeSession::new();
		session.delay = Duration::from_millis(10);
		let session = Arc::new(session);
		let pause = Arc::new(PauseCoordinator::new());

		let s2 = Arc::clone(&session);
		let p2 = Arc::clone(&pause);
		let bulk = tokio::spawn(async move {
			bulk_add(s2.as_ref(), &p2, "acct", &urls(20), &mut |_, _| {}).await
		});

		// Let the run get going, then borrow the session mid-flight.
		tokio::time::sleep(Duration::from_millis(25)).await;
		assert!(pause.request_pause("acct", Duration::from_secs(2)).await);
		let adds_at_pause = session.adds.load(Ordering::SeqCst);

		// Parked: no further adds happen while we hold the session.
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(session.adds.load(Ordering::SeqCst), adds_at_pause);

		assert!(pause.resume("acct"));
		let progress = bulk.await.unwrap().unwrap();
		assert_eq!(progress.success, 20);
	}
}
