//! Transient scrape data shapes.
//!
//! These are the payloads carried inside `rpc` / `rpc_result` frames for the
//! scrape methods. They are collected per run and handed to the consumer's
//! persistence layer; nothing in the core stores them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// RPC method name for a full cart collection.
pub const METHOD_CART_COLLECT: &str = "cart.collect";
/// RPC method name for variant enumeration on a single listing.
pub const METHOD_LISTING_VARIANTS: &str = "listing.variants";
/// RPC method name for a bulk add-to-cart run.
pub const METHOD_CART_ADD: &str = "cart.add";

/// One de-duplicated cart row.
///
/// The composite key is `(listing_id, sku_signature)`; two rows with the
/// same key describe the same sellable thing regardless of how many scroll
/// rounds re-rendered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
	pub listing_id: String,
	/// Sku id when the site exposes one, otherwise a stable signature
	/// derived from the selected options.
	pub sku_signature: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub image_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub price_cents: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub original_price_cents: Option<i64>,
	pub quantity: u32,
}

impl CartLineItem {
	/// Composite merge key for de-duplication across scroll rounds.
	pub fn key(&self) -> (String, String) {
		(self.listing_id.clone(), self.sku_signature.clone())
	}
}

/// One fully-resolved sellable variant of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuVariant {
	/// Ordered (group, option) selections that produced this leaf.
	pub selections: Vec<OptionChoice>,
	/// Resolved sku id or signature; leaves without one are dropped
	/// before they get here.
	pub sku_signature: String,
	pub price_cents: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub original_price_cents: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub thumbnail_url: Option<String>,
}

/// A single selection within one option group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChoice {
	pub group: String,
	pub option: String,
}

/// Per-scrape outcome counts reported to the result sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReport {
	/// Items seen and re-priced this run.
	pub updated: u32,
	/// Previously known items absent from this run.
	pub missing: u32,
	/// Items the run could not process.
	pub failed: u32,
}

/// Result payload of a `cart.collect` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
	pub items: Vec<CartLineItem>,
	/// Item count the cart UI claimed, when it exposed one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_hint: Option<u32>,
}

/// Parameters of a `cart.collect` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCollectParams {
	pub account_id: String,
	/// When set, collection may stop early once every listed id has been
	/// seen.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub expected_listing_ids: Vec<String>,
}

/// Parameters of a `listing.variants` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingVariantsParams {
	pub account_id: String,
	pub listing_url: String,
}

/// Parameters of a `cart.add` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartAddParams {
	pub account_id: String,
	pub listing_urls: Vec<String>,
}

/// Parses a displayed price token into minor units.
///
/// Accepts the formats storefronts actually render: `"$1,299.00"`,
/// `"1299"`, `"¥ 12.5"`, `"US $3.99"`. Returns [`None`] when no digits are
/// present. Grouping separators are the comma; at most one decimal point
/// with up to two digits is honored.
pub fn parse_price_cents(raw: &str) -> Option<i64> {
	let mut whole: i64 = 0;
	let mut frac: i64 = 0;
	let mut frac_digits = 0u32;
	let mut seen_digit = false;
	let mut in_fraction = false;

	for ch in raw.chars() {
		match ch {
			'0'..='9' => {
				seen_digit = true;
				let d = (ch as u8 - b'0') as i64;
				if in_fraction {
					if frac_digits < 2 {
						frac = frac * 10 + d;
						frac_digits += 1;
					}
				} else {
					whole = whole.saturating_mul(10).saturating_add(d);
				}
			}
			'.' if seen_digit && !in_fraction => in_fraction = true,
			',' => {}
			_ => {
				// Currency symbols and whitespace before the number are
				// fine; trailing junk after digits ends the token.
				if seen_digit {
					break;
				}
			}
		}
	}

	if !seen_digit {
		return None;
	}
	if frac_digits == 1 {
		frac *= 10;
	}
	Some(whole * 100 + frac)
}

/// Builds a stable sku signature from ordered selections, for listings
/// that never expose a sku id.
pub fn signature_from_selections(selections: &[OptionChoice]) -> String {
	// BTreeMap normalizes group ordering so two traversal orders of the
	// same combination agree.
	let ordered: BTreeMap<&str, &str> = selections
		.iter()
		.map(|c| (c.group.as_str(), c.option.as_str()))
		.collect();
	ordered
		.iter()
		.map(|(g, o)| format!("{g}={o}"))
		.collect::<Vec<_>>()
		.join("|")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_symbol_and_grouped_price() {
		assert_eq!(parse_price_cents("$1,299.00"), Some(129_900));
		assert_eq!(parse_price_cents("US $3.99"), Some(399));
		assert_eq!(parse_price_cents("¥ 12.5"), Some(1250));
		assert_eq!(parse_price_cents("1299"), Some(129_900));
	}

	#[test]
	fn rejects_priceless_text() {
		assert_eq!(parse_price_cents("sold out"), None);
		assert_eq!(parse_price_cents(""), None);
	}

	#[test]
	fn trailing_text_after_digits_is_ignored() {
		assert_eq!(parse_price_cents("3.99 each"), Some(399));
	}

	#[test]
	fn selection_signature_is_order_insensitive() {
		let a = vec![
			OptionChoice {
				group: "color".into(),
				option: "red".into(),
			},
			OptionChoice {
				group: "size".into(),
				option: "xl".into(),
			},
		];
		let b: Vec<OptionChoice> = a.iter().rev().cloned().collect();
		assert_eq!(signature_from_selections(&a), signature_from_selections(&b));
		assert_eq!(signature_from_selections(&a), "color=red|size=xl");
	}

	#[test]
	fn line_item_serializes_camel_case() {
		let item = CartLineItem {
			listing_id: "l1".into(),
			sku_signature: "s1".into(),
			title: Some("Widget".into()),
			image_url: None,
			price_cents: Some(1999),
			original_price_cents: None,
			quantity: 2,
		};
		let json = serde_json::to_string(&item).unwrap();
		assert!(json.contains(r#""listingId":"l1""#));
		assert!(json.contains(r#""priceCents":1999"#));
		assert!(!json.contains("imageUrl"));
	}
}
