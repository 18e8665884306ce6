//! Cart page adapter.
//!
//! One JS round-trip extracts every rendered row at once; per-element
//! WebDriver calls on a virtualized list race the renderer and lose.

use async_trait::async_trait;
use cw_core::page::{CartView, ScrollPosition};
use cw_core::{CoreError, Result};
use cw_protocol::{CartLineItem, parse_price_cents};
use serde::Deserialize;
use thirtyfour::WebDriver;
use tracing::trace;

use super::session::wd_err;
use crate::config::Selectors;

pub struct WebDriverCartPage {
	driver: WebDriver,
	selectors: Selectors,
}

/// Row shape produced by the extraction script.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRow {
	listing_id: Option<String>,
	sku_id: Option<String>,
	title: Option<String>,
	image: Option<String>,
	price: Option<String>,
	original_price: Option<String>,
	quantity: Option<u32>,
}

impl WebDriverCartPage {
	pub fn new(driver: WebDriver, selectors: Selectors) -> Self {
		Self { driver, selectors }
	}

	fn extract_script(&self) -> String {
		format!(
			r#"
			return Array.from(document.querySelectorAll('{item}')).map(el => ({{
				listingId: el.getAttribute('data-listing-id'),
				skuId: el.getAttribute('data-sku-id'),
				title: el.querySelector('[data-role=item-title]')?.textContent?.trim() ?? null,
				image: el.querySelector('img')?.src ?? null,
				price: el.querySelector('{price}')?.textContent?.trim() ?? null,
				originalPrice: el.querySelector('{original}')?.textContent?.trim() ?? null,
				quantity: parseInt(el.getAttribute('data-quantity') ?? '1', 10)
			}}));
			"#,
			item = self.selectors.cart_item,
			price = self.selectors.price,
			original = self.selectors.original_price,
		)
	}
}

#[async_trait]
impl CartView for WebDriverCartPage {
	async fn visible_items(&self) -> Result<Vec<CartLineItem>> {
		let ret = self
			.driver
			.execute(&self.extract_script(), vec![])
			.await
			.map_err(wd_err)?;
		let rows: Vec<RawRow> = serde_json::from_value(ret.json().clone())
			.map_err(|e| CoreError::Page(format!("cart extraction shape: {e}")))?;

		let items = rows
			.into_iter()
			.filter_map(|row| {
				// Rows the virtual renderer has not hydrated yet carry no
				// listing id; the next round will see them populated.
				let listing_id = row.listing_id?;
				Some(CartLineItem {
					listing_id,
					sku_signature: row.sku_id.unwrap_or_else(|| "default".into()),
					title: row.title,
					image_url: row.image,
					price_cents: row.price.as_deref().and_then(parse_price_cents),
					original_price_cents: row.original_price.as_deref().and_then(parse_price_cents),
					quantity: row.quantity.unwrap_or(1).max(1),
				})
			})
			.collect::<Vec<_>>();
		trace!(target = "cw.cart", rendered = items.len(), "extracted visible rows");
		Ok(items)
	}

	async fn total_hint(&self) -> Result<Option<u32>> {
		let script = format!(
			"return document.querySelector('{}')?.textContent ?? null;",
			self.selectors.cart_total_hint
		);
		let ret = self.driver.execute(&script, vec![]).await.map_err(wd_err)?;
		Ok(ret
			.json()
			.as_str()
			.and_then(|text| {
				let digits: String = text.chars().filter(char::is_ascii_digit).collect();
				digits.parse().ok()
			}))
	}

	async fn scroll_position(&self) -> Result<ScrollPosition> {
		let script = format!(
			r#"
			const list = document.querySelector('{list}') ?? document.scrollingElement;
			return {{ offset: Math.round(list.scrollTop), max: Math.round(list.scrollHeight - list.clientHeight) }};
			"#,
			list = self.selectors.cart_list
		);
		let ret = self.driver.execute(&script, vec![]).await.map_err(wd_err)?;
		let value = ret.json();
		let offset = value.get("offset").and_then(|v| v.as_i64()).unwrap_or(0);
		let max = value.get("max").and_then(|v| v.as_i64()).unwrap_or(0);
		Ok(ScrollPosition { offset, max })
	}

	async fn scroll_by(&self, delta: i64) -> Result<()> {
		let script = format!(
			r#"
			const list = document.querySelector('{list}') ?? document.scrollingElement;
			list.scrollBy(0, arguments[0]);
			"#,
			list = self.selectors.cart_list
		);
		self.driver
			.execute(&script, vec![serde_json::json!(delta)])
			.await
			.map_err(wd_err)?;
		Ok(())
	}

	async fn trailing_text(&self) -> Result<Option<String>> {
		let script = format!(
			"return document.querySelector('{}')?.textContent?.trim() ?? null;",
			self.selectors.cart_trailing
		);
		let ret = self.driver.execute(&script, vec![]).await.map_err(wd_err)?;
		Ok(ret.json().as_str().map(str::to_string))
	}
}
