//! Risk back-off.
//!
//! Captcha and forced-login signals mean the site is suspicious of the
//! whole process, not just one account, so the pause is process-wide.
//! Consecutive signals escalate the pause exponentially up to a cap; any
//! clean success resets the streak.

use std::time::Duration;

use tracing::{info, warn};

const BASE_PAUSE: Duration = Duration::from_secs(5 * 60);
const MAX_PAUSE: Duration = Duration::from_secs(60 * 60);

/// Process-wide risk state. Owned by the scheduler, not a global.
#[derive(Debug, Default)]
pub struct RiskState {
	streak: u32,
	pause_until: Option<u64>,
}

impl RiskState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records one risk signal at `now` (unix seconds) and returns the
	/// pause duration applied: `min(5min × 2^(streak-1), 60min)`.
	pub fn record_risk(&mut self, now: u64) -> Duration {
		self.streak += 1;
		let factor = 2u32.saturating_pow(self.streak.saturating_sub(1));
		let pause = BASE_PAUSE.saturating_mul(factor).min(MAX_PAUSE);
		self.pause_until = Some(now + pause.as_secs());
		warn!(
			target = "cw.sched",
			streak = self.streak,
			pause_secs = pause.as_secs(),
			"risk signal, pausing scheduling"
		);
		pause
	}

	/// Records a clean success: streak and pause both clear.
	pub fn record_success(&mut self) {
		if self.streak > 0 {
			info!(target = "cw.sched", "clean run, risk streak reset");
		}
		self.streak = 0;
		self.pause_until = None;
	}

	/// Whether scheduling is paused at `now`.
	pub fn is_paused(&self, now: u64) -> bool {
		self.pause_until.is_some_and(|until| now < until)
	}

	pub fn streak(&self) -> u32 {
		self.streak
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn consecutive_signals_escalate_then_cap() {
		let mut risk = RiskState::new();
		let now = 1_700_000_000;
		assert_eq!(risk.record_risk(now), Duration::from_secs(300));
		assert_eq!(risk.record_risk(now), Duration::from_secs(600));
		assert_eq!(risk.record_risk(now), Duration::from_secs(1200));
		assert_eq!(risk.record_risk(now), Duration::from_secs(2400));
		assert_eq!(risk.record_risk(now), Duration::from_secs(3600));
		// Capped: a sixth signal stays at the ceiling.
		assert_eq!(risk.record_risk(now), Duration::from_secs(3600));
	}

	#[test]
	fn success_resets_streak_and_pause() {
		let mut risk = RiskState::new();
		let now = 1_700_000_000;
		risk.record_risk(now);
		risk.record_risk(now);
		assert!(risk.is_paused(now + 1));
		risk.record_success();
		assert_eq!(risk.streak(), 0);
		assert!(!risk.is_paused(now + 1));
		// Next signal starts the ladder over.
		assert_eq!(risk.record_risk(now), Duration::from_secs(300));
	}

	#[test]
	fn pause_expires_on_its_own() {
		let mut risk = RiskState::new();
		let now = 1_700_000_000;
		let pause = risk.record_risk(now);
		assert!(risk.is_paused(now + pause.as_secs() - 1));
		assert!(!risk.is_paused(now + pause.as_secs()));
	}
}
