//! Incremental cart collection over a virtualized list.
//!
//! The cart page renders a sliding window of rows, so one extraction pass
//! never sees everything. The collector loops extract → merge → scroll
//! until convergence, judged from four signals: scroll bottom, a round
//! that merged nothing new, the UI's own total-count hint, and an
//! optional expected-id set. At the bottom with expectations unmet it
//! bounces back up and retries a bounded number of times before either
//! accepting a trailing end-of-list marker or giving up.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use cw_protocol::{CartLineItem, CartSnapshot};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::page::CartView;

/// Tunables for one collection run.
#[derive(Debug, Clone)]
pub struct CartCollectorConfig {
	/// Hard cap on extract/scroll rounds.
	pub max_rounds: u32,
	/// Bounce-back retries allowed at the bottom before giving up.
	pub max_bounce_retries: u32,
	/// Forward scroll step, roughly one screenful.
	pub scroll_step: i64,
	/// Wait after each scroll for the virtualized list to re-render.
	pub settle: Duration,
	/// Trailing copy that legitimizes stopping short of expectations.
	/// Site-specific pattern matches on page text; configured, not
	/// hardcoded.
	pub end_markers: Vec<String>,
}

impl Default for CartCollectorConfig {
	fn default() -> Self {
		Self {
			max_rounds: 60,
			max_bounce_retries: 3,
			scroll_step: 800,
			settle: Duration::from_millis(400),
			end_markers: vec!["no more items".into(), "recommended for you".into()],
		}
	}
}

/// Options for one collection run.
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
	/// When non-empty, collection may stop as soon as every id here has
	/// been seen at least once.
	pub expected_listing_ids: HashSet<String>,
}

/// Collects every distinct line item from the cart view.
pub async fn collect(
	view: &dyn CartView,
	config: &CartCollectorConfig,
	options: &CollectOptions,
) -> Result<CartSnapshot> {
	let mut merged: BTreeMap<(String, String), CartLineItem> = BTreeMap::new();
	let mut total_hint: Option<u32> = None;
	let mut bounces = 0u32;
	let mut last_offset: Option<i64> = None;

	for round in 0..config.max_rounds {
		let fresh = view.visible_items().await?;
		let new_keys = merge_items(&mut merged, fresh);

		if let Some(hint) = view.total_hint().await? {
			total_hint = Some(hint);
		}

		if expectations_met(&merged, options) {
			debug!(target = "cw.cart", round, items = merged.len(), "expected ids all seen");
			break;
		}
		if hint_met(&merged, total_hint) {
			debug!(target = "cw.cart", round, items = merged.len(), "ui total hint satisfied");
			break;
		}

		let pos = view.scroll_position().await?;
		let stuck = last_offset == Some(pos.offset) && new_keys == 0;
		last_offset = Some(pos.offset);

		if pos.at_bottom() || stuck {
			if pos.at_bottom() && new_keys > 0 {
				// Fresh rows just rendered at the bottom; extract again
				// before judging convergence.
				tokio::time::sleep(config.settle).await;
				continue;
			}
			if pos.at_bottom() && !has_unmet_expectations(&merged, options, total_hint) {
				debug!(target = "cw.cart", round, items = merged.len(), "converged at bottom");
				break;
			}
			if bounces >= config.max_bounce_retries {
				let trailing = view.trailing_text().await.unwrap_or(None);
				let diagnosis = diagnose_stop(trailing.as_deref(), &config.end_markers, pos.at_bottom());
				if diagnosis.legitimate_end {
					warn!(
						target = "cw.cart",
						round,
						items = merged.len(),
						reason = %diagnosis.reason,
						"stopping short of expectations at list end"
					);
					break;
				}
				return Err(CoreError::ConvergenceGiveUp {
					rounds: round + 1,
					reason: diagnosis.reason,
				});
			}
			// Bounce: nudge the list back up and let the renderer catch up
			// before the next pass.
			bounces += 1;
			debug!(target = "cw.cart", round, bounces, stuck, "bounce-back retry");
			view.scroll_by(-(config.scroll_step / 2)).await?;
			tokio::time::sleep(config.settle).await;
			continue;
		}

		view.scroll_by(config.scroll_step).await?;
		tokio::time::sleep(config.settle).await;
	}

	if has_unmet_expectations(&merged, options, total_hint) {
		return Err(CoreError::ConvergenceGiveUp {
			rounds: config.max_rounds,
			reason: "round cap reached with expectations unmet".into(),
		});
	}

	Ok(CartSnapshot {
		items: merged.into_values().collect(),
		total_hint,
	})
}

/// Merges freshly extracted rows into the running map. Returns how many
/// previously unseen keys appeared. Later sightings only fill fields the
/// earlier sighting lacked; a populated field is never overwritten with a
/// re-render's possibly-stale copy.
fn merge_items(
	merged: &mut BTreeMap<(String, String), CartLineItem>,
	fresh: Vec<CartLineItem>,
) -> usize {
	let mut new_keys = 0;
	for item in fresh {
		match merged.entry(item.key()) {
			std::collections::btree_map::Entry::Vacant(slot) => {
				slot.insert(item);
				new_keys += 1;
			}
			std::collections::btree_map::Entry::Occupied(mut slot) => {
				let known = slot.get_mut();
				if known.title.is_none() {
					known.title = item.title;
				}
				if known.image_url.is_none() {
					known.image_url = item.image_url;
				}
				if known.price_cents.is_none() {
					known.price_cents = item.price_cents;
				}
				if known.original_price_cents.is_none() {
					known.original_price_cents = item.original_price_cents;
				}
			}
		}
	}
	new_keys
}

fn expectations_met(
	merged: &BTreeMap<(String, String), CartLineItem>,
	options: &CollectOptions,
) -> bool {
	if options.expected_listing_ids.is_empty() {
		return false;
	}
	let seen: HashSet<&str> = merged.keys().map(|(listing, _)| listing.as_str()).collect();
	options
		.expected_listing_ids
		.iter()
		.all(|id| seen.contains(id.as_str()))
}

fn hint_met(merged: &BTreeMap<(String, String), CartLineItem>, hint: Option<u32>) -> bool {
	let Some(hint) = hint else {
		return false;
	};
	let quantity: u32 = merged.values().map(|i| i.quantity).sum();
	quantity >= hint
}

fn has_unmet_expectations(
	merged: &BTreeMap<(String, String), CartLineItem>,
	options: &CollectOptions,
	hint: Option<u32>,
) -> bool {
	let expected_unmet =
		!options.expected_listing_ids.is_empty() && !expectations_met(merged, options);
	let hint_unmet = hint.is_some() && !hint_met(merged, hint);
	expected_unmet || hint_unmet
}

struct StopDiagnosis {
	legitimate_end: bool,
	reason: String,
}

/// Heuristic "why we stopped" diagnosis when the loop is about to give up.
fn diagnose_stop(trailing: Option<&str>, end_markers: &[String], at_bottom: bool) -> StopDiagnosis {
	if let Some(text) = trailing {
		let lowered = text.to_lowercase();
		if let Some(marker) = end_markers.iter().find(|m| lowered.contains(&m.to_lowercase())) {
			return StopDiagnosis {
				legitimate_end: true,
				reason: format!("trailing end-of-list marker: {marker:?}"),
			};
		}
	}
	StopDiagnosis {
		legitimate_end: false,
		reason: if at_bottom {
			"bottom reached but expectations unmet and no end-of-list marker".into()
		} else {
			"scroll position stopped advancing".into()
		},
	}
}
