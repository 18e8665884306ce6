//! Listing page adapter for the cascading option-selection UI.

use async_trait::async_trait;
use cw_core::page::ListingView;
use cw_core::{CoreError, Result};
use thirtyfour::WebDriver;
use thirtyfour::prelude::*;

use super::session::wd_err;
use crate::config::Selectors;

pub struct WebDriverListingPage {
	driver: WebDriver,
	selectors: Selectors,
}

impl WebDriverListingPage {
	pub fn new(driver: WebDriver, selectors: Selectors) -> Self {
		Self { driver, selectors }
	}

	fn option_css(&self, group: &str, option: &str) -> String {
		format!(
			"{}[data-group-name='{}'] {}[data-option-id='{}']",
			self.selectors.option_group,
			css_escape(group),
			self.selectors.option_node,
			css_escape(option),
		)
	}

	async fn text_of(&self, selector: &str) -> Result<Option<String>> {
		let script = format!("return document.querySelector('{selector}')?.textContent?.trim() ?? null;");
		let ret = self.driver.execute(&script, vec![]).await.map_err(wd_err)?;
		Ok(ret.json().as_str().map(str::to_string))
	}
}

#[async_trait]
impl ListingView for WebDriverListingPage {
	async fn option_groups(&self) -> Result<Vec<String>> {
		let groups = self
			.driver
			.find_all(By::Css(self.selectors.option_group.as_str()))
			.await
			.map_err(wd_err)?;
		let mut names = Vec::with_capacity(groups.len());
		for group in groups {
			if let Some(name) = group.attr("data-group-name").await.map_err(wd_err)? {
				names.push(name);
			}
		}
		Ok(names)
	}

	async fn enabled_options(&self, group: &str) -> Result<Vec<String>> {
		let css = format!(
			"{}[data-group-name='{}'] {}",
			self.selectors.option_group,
			css_escape(group),
			self.selectors.option_node
		);
		let nodes = self.driver.find_all(By::Css(css.as_str())).await.map_err(wd_err)?;
		let mut options = Vec::new();
		for node in nodes {
			let class = node.class_name().await.map_err(wd_err)?.unwrap_or_default();
			if class
				.split_whitespace()
				.any(|c| c == self.selectors.option_disabled_class)
			{
				continue;
			}
			if let Some(id) = node.attr("data-option-id").await.map_err(wd_err)? {
				options.push(id);
			}
		}
		Ok(options)
	}

	async fn select(&self, group: &str, option: &str) -> Result<()> {
		let css = self.option_css(group, option);
		let node = self
			.driver
			.find(By::Css(css.as_str()))
			.await
			.map_err(|_| CoreError::Page(format!("option {group}/{option} not found")))?;
		node.scroll_into_view().await.map_err(wd_err)?;
		node.click().await.map_err(wd_err)?;
		Ok(())
	}

	async fn is_selected(&self, group: &str, option: &str) -> Result<bool> {
		let css = self.option_css(group, option);
		let node = match self.driver.find(By::Css(css.as_str())).await {
			Ok(node) => node,
			Err(_) => return Ok(false),
		};
		let class = node.class_name().await.map_err(wd_err)?.unwrap_or_default();
		Ok(class
			.split_whitespace()
			.any(|c| c == self.selectors.option_selected_class))
	}

	async fn price_text(&self) -> Result<Option<String>> {
		self.text_of(&self.selectors.price).await
	}

	async fn original_price_text(&self) -> Result<Option<String>> {
		self.text_of(&self.selectors.original_price).await
	}

	async fn sku_id(&self) -> Result<Option<String>> {
		let script = format!(
			"return document.querySelector('{}')?.getAttribute('data-sku-id') ?? null;",
			self.selectors.sku_container
		);
		let ret = self.driver.execute(&script, vec![]).await.map_err(wd_err)?;
		Ok(ret.json().as_str().map(str::to_string))
	}

	async fn thumbnail_url(&self) -> Result<Option<String>> {
		let script = format!(
			"return document.querySelector('{}')?.src ?? null;",
			self.selectors.thumbnail
		);
		let ret = self.driver.execute(&script, vec![]).await.map_err(wd_err)?;
		Ok(ret.json().as_str().map(str::to_string))
	}
}

/// Minimal escaping for attribute values interpolated into CSS strings.
fn css_escape(raw: &str) -> String {
	raw.replace('\\', "\\\\").replace('\'', "\\'")
}
