//! Combinatorial variant enumeration over a cascading option UI.
//!
//! Depth-first traversal over the page's option groups: select an enabled
//! option, wait for the selection to land, recurse into the next group.
//! At a leaf, wait for the displayed price to stop moving (the storefront
//! re-prices asynchronously after every click), then record the resolved
//! variant. The traversal itself is pure choice-making; every page
//! interaction goes through [`ListingView`], so the algorithm runs
//! unchanged against a fake in tests.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use cw_protocol::{OptionChoice, SkuVariant, parse_price_cents, signature_from_selections};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::page::ListingView;

/// Tunables for one enumeration run.
#[derive(Debug, Clone)]
pub struct VariantEnumeratorConfig {
	/// Cap on recorded variants, bounding pathological option spaces.
	pub max_variants: usize,
	/// Budget for one option's selected-state to flip after a click.
	pub select_timeout: Duration,
	/// Poll cadence while waiting for selection or price.
	pub poll: Duration,
	/// How long the price token must hold still to count as stable.
	pub price_debounce: Duration,
	/// Overall budget for price stabilization at one leaf.
	pub price_timeout: Duration,
}

impl Default for VariantEnumeratorConfig {
	fn default() -> Self {
		Self {
			max_variants: 200,
			select_timeout: Duration::from_secs(5),
			poll: Duration::from_millis(100),
			price_debounce: Duration::from_millis(300),
			price_timeout: Duration::from_secs(5),
		}
	}
}

/// Enumerates every sellable option combination of the listing.
pub async fn enumerate(
	view: &dyn ListingView,
	config: &VariantEnumeratorConfig,
) -> Result<Vec<SkuVariant>> {
	let groups = view.option_groups().await?;

	if groups.is_empty() {
		// Single-variant listing: record the displayed price as the sole
		// result.
		return match record_leaf(view, config, &[]).await? {
			Some(variant) => Ok(vec![variant]),
			None => {
				warn!(target = "cw.sku", "single-variant listing with no resolvable price");
				Ok(Vec::new())
			}
		};
	}

	let mut state = Traversal {
		view,
		config,
		groups: &groups,
		seen: HashSet::new(),
		variants: Vec::new(),
	};
	descend(&mut state, 0, &mut Vec::new()).await?;
	debug!(
		target = "cw.sku",
		groups = groups.len(),
		variants = state.variants.len(),
		"enumeration complete"
	);
	Ok(state.variants)
}

struct Traversal<'a> {
	view: &'a dyn ListingView,
	config: &'a VariantEnumeratorConfig,
	groups: &'a [String],
	seen: HashSet<String>,
	variants: Vec<SkuVariant>,
}

/// Recursion helper; boxed because async recursion needs an indirection.
fn descend<'a>(
	state: &'a mut Traversal<'_>,
	depth: usize,
	selections: &'a mut Vec<OptionChoice>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
	Box::pin(async move {
		if state.variants.len() >= state.config.max_variants {
			return Ok(());
		}
		if depth == state.groups.len() {
			if let Some(variant) = record_leaf(state.view, state.config, selections).await? {
				if state.seen.insert(variant.sku_signature.clone()) {
					state.variants.push(variant);
				}
			}
			return Ok(());
		}

		let group = state.groups[depth].clone();
		let view = state.view;
		let config = state.config;
		let options = view.enabled_options(&group).await?;
		for option in options {
			if state.variants.len() >= config.max_variants {
				debug!(target = "cw.sku", cap = config.max_variants, "variant cap reached");
				return Ok(());
			}
			if !select_and_confirm(view, config, &group, &option).await? {
				// Selection never landed; skip this branch rather than
				// recording leaves under a wrong page state.
				warn!(target = "cw.sku", group = %group, option = %option, "selection did not land");
				continue;
			}
			selections.push(OptionChoice {
				group: group.clone(),
				option: option.clone(),
			});
			descend(state, depth + 1, selections).await?;
			selections.pop();
		}
		Ok(())
	})
}

/// Clicks an option and polls until its selected-state flips, bounded by
/// the configured timeout. Returns `false` when it never flips.
async fn select_and_confirm(
	view: &dyn ListingView,
	config: &VariantEnumeratorConfig,
	group: &str,
	option: &str,
) -> Result<bool> {
	view.select(group, option).await?;
	let deadline = Instant::now() + config.select_timeout;
	loop {
		if view.is_selected(group, option).await? {
			return Ok(true);
		}
		if Instant::now() >= deadline {
			return Ok(false);
		}
		tokio::time::sleep(config.poll).await;
	}
}

/// Reads a stable price at the current selection and builds the variant.
/// Returns `None` when no key or no price can be resolved; such leaves
/// are dropped.
async fn record_leaf(
	view: &dyn ListingView,
	config: &VariantEnumeratorConfig,
	selections: &[OptionChoice],
) -> Result<Option<SkuVariant>> {
	let Some(price_token) = wait_for_stable_price(view, config).await? else {
		return Ok(None);
	};
	let Some(price_cents) = parse_price_cents(&price_token) else {
		return Ok(None);
	};

	let sku_signature = match view.sku_id().await? {
		Some(id) if !id.is_empty() => id,
		_ if !selections.is_empty() => signature_from_selections(selections),
		_ => return Ok(None),
	};

	let original_price_cents = view
		.original_price_text()
		.await?
		.as_deref()
		.and_then(parse_price_cents);
	let thumbnail_url = view.thumbnail_url().await?;

	Ok(Some(SkuVariant {
		selections: selections.to_vec(),
		sku_signature,
		price_cents,
		original_price_cents,
		thumbnail_url,
	}))
}

/// Polls the displayed price until the token stops changing for the
/// debounce window. Under the overall timeout, the last observed token is
/// still accepted; with no token at all the leaf is unpriceable.
async fn wait_for_stable_price(
	view: &dyn ListingView,
	config: &VariantEnumeratorConfig,
) -> Result<Option<String>> {
	let deadline = Instant::now() + config.price_timeout;
	let mut last: Option<String> = None;
	let mut held_since = Instant::now();

	loop {
		let current = view.price_text().await?;
		if current != last {
			last = current;
			held_since = Instant::now();
		} else if last.is_some() && held_since.elapsed() >= config.price_debounce {
			return Ok(last);
		}
		if Instant::now() >= deadline {
			return Ok(last);
		}
		tokio::time::sleep(config.poll).await;
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use parking_lot::Mutex;

	use super::*;

	/// Fake cascading-selector page. Selection lands `select_delay_polls`
	/// reads after the click; the leaf price flickers through `unstable`
	/// tokens before settling, exercising the debounce.
	struct FakeListing {
		groups: Vec<(String, Vec<String>)>,
		disabled: HashSet<(String, String)>,
		/// Price per full selection signature.
		prices: HashMap<String, String>,
		sku_ids: HashMap<String, String>,
		select_delay_polls: u32,
		state: Mutex<FakeState>,
	}

	#[derive(Default)]
	struct FakeState {
		selected: HashMap<String, String>,
		pending: Option<(String, String, u32)>,
		price_flicker: u32,
	}

	impl FakeListing {
		fn two_by_three() -> Self {
			let mut prices = HashMap::new();
			let mut sku_ids = HashMap::new();
			for color in ["red", "blue"] {
				for size in ["s", "m", "l"] {
					let sig = format!("color={color}|size={size}");
					prices.insert(sig.clone(), format!("$1{}.00", sig.len()));
					sku_ids.insert(sig.clone(), format!("sku-{color}-{size}"));
				}
			}
			Self {
				groups: vec![
					("color".into(), vec!["red".into(), "blue".into()]),
					("size".into(), vec!["s".into(), "m".into(), "l".into()]),
				],
				disabled: HashSet::new(),
				prices,
				sku_ids,
				select_delay_polls: 1,
				state: Mutex::new(FakeState::default()),
			}
		}

		fn current_signature(&self) -> Option<String> {
			let state = self.state.lock();
			if state.selected.len() != self.groups.len() {
				return None;
			}
			let choices: Vec<OptionChoice> = state
				.selected
				.iter()
				.map(|(g, o)| OptionChoice {
					group: g.clone(),
					option: o.clone(),
				})
				.collect();
			Some(signature_from_selections(&choices))
		}
	}

	#[async_trait::async_trait]
	impl ListingView for FakeListing {
		async fn option_groups(&self) -> Result<Vec<String>> {
			Ok(self.groups.iter().map(|(g, _)| g.clone()).collect())
		}

		async fn enabled_options(&self, group: &str) -> Result<Vec<String>> {
			Ok(self
				.groups
				.iter()
				.find(|(g, _)| g == group)
				.map(|(_, options)| {
					options
						.iter()
						.filter(|o| !self.disabled.contains(&(group.to_string(), o.to_string())))
						.cloned()
						.collect()
				})
				.unwrap_or_default())
		}

		async fn select(&self, group: &str, option: &str) -> Result<()> {
			let mut state = self.state.lock();
			state.pending = Some((group.to_string(), option.to_string(), self.select_delay_polls));
			state.price_flicker = 2;
			Ok(())
		}

		async fn is_selected(&self, group: &str, option: &str) -> Result<bool> {
			let mut state = self.state.lock();
			if let Some((g, o, polls_left)) = state.pending.take() {
				if polls_left > 0 {
					state.pending = Some((g, o, polls_left - 1));
				} else {
					state.selected.insert(g, o);
				}
			}
			Ok(state.selected.get(group).map(String::as_str) == Some(option))
		}

		async fn price_text(&self) -> Result<Option<String>> {
			{
				let mut state = self.state.lock();
				if state.price_flicker > 0 {
					state.price_flicker -= 1;
					return Ok(Some(format!("$0.0{}", state.price_flicker)));
				}
			}
			Ok(self
				.current_signature()
				.and_then(|sig| self.prices.get(&sig).cloned()))
		}

		async fn original_price_text(&self) -> Result<Option<String>> {
			Ok(None)
		}

		async fn sku_id(&self) -> Result<Option<String>> {
			Ok(self
				.current_signature()
				.and_then(|sig| self.sku_ids.get(&sig).cloned()))
		}

		async fn thumbnail_url(&self) -> Result<Option<String>> {
			Ok(Some("https://img.example/thumb.jpg".into()))
		}
	}

	fn fast_config() -> VariantEnumeratorConfig {
		VariantEnumeratorConfig {
			poll: Duration::ZERO,
			price_debounce: Duration::ZERO,
			price_timeout: Duration::from_secs(1),
			select_timeout: Duration::from_secs(1),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn two_by_three_space_yields_six_priced_leaves() {
		let view = FakeListing::two_by_three();
		let variants = enumerate(&view, &fast_config()).await.unwrap();

		assert_eq!(variants.len(), 6);
		let keys: HashSet<_> = variants.iter().map(|v| v.sku_signature.clone()).collect();
		assert_eq!(keys.len(), 6, "resolved keys must be unique");
		assert!(variants.iter().all(|v| v.price_cents > 0));
		assert!(variants.iter().all(|v| v.selections.len() == 2));
	}

	#[tokio::test]
	async fn disabled_options_are_not_traversed() {
		let mut view = FakeListing::two_by_three();
		view.disabled.insert(("size".into(), "l".into()));
		let variants = enumerate(&view, &fast_config()).await.unwrap();
		assert_eq!(variants.len(), 4);
		assert!(
			variants
				.iter()
				.all(|v| v.selections.iter().all(|c| c.option != "l"))
		);
	}

	#[tokio::test]
	async fn variant_cap_bounds_the_traversal() {
		let view = FakeListing::two_by_three();
		let mut config = fast_config();
		config.max_variants = 4;
		let variants = enumerate(&view, &config).await.unwrap();
		assert_eq!(variants.len(), 4);
	}

	#[tokio::test]
	async fn no_groups_records_single_variant_from_displayed_price() {
		struct Plain;

		#[async_trait::async_trait]
		impl ListingView for Plain {
			async fn option_groups(&self) -> Result<Vec<String>> {
				Ok(Vec::new())
			}
			async fn enabled_options(&self, _group: &str) -> Result<Vec<String>> {
				Ok(Vec::new())
			}
			async fn select(&self, _group: &str, _option: &str) -> Result<()> {
				Ok(())
			}
			async fn is_selected(&self, _group: &str, _option: &str) -> Result<bool> {
				Ok(false)
			}
			async fn price_text(&self) -> Result<Option<String>> {
				Ok(Some("$42.00".into()))
			}
			async fn original_price_text(&self) -> Result<Option<String>> {
				Ok(Some("$50.00".into()))
			}
			async fn sku_id(&self) -> Result<Option<String>> {
				Ok(Some("sku-plain".into()))
			}
			async fn thumbnail_url(&self) -> Result<Option<String>> {
				Ok(None)
			}
		}

		let variants = enumerate(&Plain, &fast_config()).await.unwrap();
		assert_eq!(variants.len(), 1);
		assert_eq!(variants[0].sku_signature, "sku-plain");
		assert_eq!(variants[0].price_cents, 4200);
		assert_eq!(variants[0].original_price_cents, Some(5000));
		assert!(variants[0].selections.is_empty());
	}
}
