//! Quiet-hours window.
//!
//! A `[start, end)` time-of-day window during which no new scraping is
//! scheduled - a cart being read at 03:41 every night is exactly the kind
//! of pattern a storefront's risk engine looks for. Wrapping midnight is
//! supported (`23:00-06:30`). Jobs already queued still execute unless
//! the worker itself re-checks before doing network work, which the
//! scheduler's processor does.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Half-open daily suppression window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
	pub start: NaiveTime,
	pub end: NaiveTime,
}

impl QuietHours {
	pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
		Self { start, end }
	}

	/// Parses `"HH:MM-HH:MM"`.
	pub fn parse(spec: &str) -> Option<Self> {
		let (start, end) = spec.split_once('-')?;
		Some(Self {
			start: NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?,
			end: NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?,
		})
	}

	/// Whether `t` falls inside the window.
	pub fn contains(&self, t: NaiveTime) -> bool {
		if self.start <= self.end {
			t >= self.start && t < self.end
		} else {
			// Wraps midnight: [start, 24:00) ∪ [00:00, end).
			t >= self.start || t < self.end
		}
	}

	/// Whether the local wall clock is currently inside the window.
	pub fn active_now(&self) -> bool {
		let now = chrono::Local::now().time();
		// Truncate to whole seconds so the comparison matches the minute
		// precision the window is configured with.
		let now = NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second()).unwrap_or(now);
		self.contains(now)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn t(h: u32, m: u32) -> NaiveTime {
		NaiveTime::from_hms_opt(h, m, 0).unwrap()
	}

	#[test]
	fn plain_window_is_half_open() {
		let window = QuietHours::parse("01:00-06:00").unwrap();
		assert!(!window.contains(t(0, 59)));
		assert!(window.contains(t(1, 0)));
		assert!(window.contains(t(5, 59)));
		assert!(!window.contains(t(6, 0)));
	}

	#[test]
	fn wrapping_window_covers_both_sides_of_midnight() {
		let window = QuietHours::parse("23:00-06:30").unwrap();
		assert!(window.contains(t(23, 0)));
		assert!(window.contains(t(2, 15)));
		assert!(window.contains(t(6, 29)));
		assert!(!window.contains(t(6, 30)));
		assert!(!window.contains(t(12, 0)));
	}

	#[test]
	fn malformed_spec_is_rejected() {
		assert!(QuietHours::parse("23:00").is_none());
		assert!(QuietHours::parse("25:00-06:00").is_none());
		assert!(QuietHours::parse("").is_none());
	}
}
