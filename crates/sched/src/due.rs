//! Jittered due-time computation.
//!
//! Re-scraping every account exactly `base` apart would both let the
//! target site fingerprint the cadence and stampede every account at
//! process start. The actual threshold for one account lies in
//! `[0.5×base, 1.5×base]`, derived deterministically from a hash of
//! `(account_id, last_run_at)`: the same account evaluates to the same
//! answer on every poll tick, while different accounts desynchronize from
//! each other.

use std::time::Duration;

use sha2::{Digest, Sha256};

/// Threshold after `last_run_at` before the account is due again.
pub fn due_threshold(account_id: &str, last_run_at: u64, base: Duration) -> Duration {
	let mut hasher = Sha256::new();
	hasher.update(account_id.as_bytes());
	hasher.update(b":");
	hasher.update(last_run_at.to_be_bytes());
	let digest = hasher.finalize();

	let raw = u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
	let fraction = raw as f64 / u64::MAX as f64;
	base.mul_f64(0.5 + fraction)
}

/// Whether the account is due for a re-scrape at `now`.
pub fn is_due(account_id: &str, last_run_at: u64, base: Duration, now: u64) -> bool {
	// A never-run account is due immediately.
	if last_run_at == 0 {
		return true;
	}
	let threshold = due_threshold(account_id, last_run_at, base);
	now.saturating_sub(last_run_at) >= threshold.as_secs()
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE: Duration = Duration::from_secs(1800);

	#[test]
	fn threshold_is_deterministic_for_fixed_inputs() {
		let a = due_threshold("acct-1", 1_700_000_000, BASE);
		let b = due_threshold("acct-1", 1_700_000_000, BASE);
		assert_eq!(a, b);
	}

	#[test]
	fn threshold_stays_within_half_to_three_halves_of_base() {
		for i in 0..500 {
			let threshold = due_threshold(&format!("acct-{i}"), 1_700_000_000 + i, BASE);
			assert!(threshold >= BASE / 2, "too early for acct-{i}: {threshold:?}");
			assert!(threshold <= BASE * 3 / 2, "too late for acct-{i}: {threshold:?}");
		}
	}

	#[test]
	fn accounts_desynchronize_from_each_other() {
		let a = due_threshold("acct-a", 1_700_000_000, BASE);
		let b = due_threshold("acct-b", 1_700_000_000, BASE);
		assert_ne!(a, b);
	}

	#[test]
	fn new_run_timestamp_reshuffles_the_jitter() {
		let a = due_threshold("acct-a", 1_700_000_000, BASE);
		let b = due_threshold("acct-a", 1_700_002_000, BASE);
		assert_ne!(a, b);
	}

	#[test]
	fn never_run_account_is_due_immediately() {
		assert!(is_due("acct", 0, BASE, 1_700_000_000));
	}

	#[test]
	fn account_is_never_due_before_half_base() {
		let last = 1_700_000_000u64;
		assert!(!is_due("acct", last, BASE, last + BASE.as_secs() / 2 - 1));
		assert!(is_due("acct", last, BASE, last + BASE.as_secs() * 3 / 2));
	}
}
