//! WebDriver-backed sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_core::page::{ListingView, CartView, PageSession, SessionBackend};
use cw_core::{CoreError, Credential, Result};
use thirtyfour::prelude::*;
use tracing::{debug, info};

use super::cart_page::WebDriverCartPage;
use super::listing_page::WebDriverListingPage;
use super::stealth;
use crate::config::Selectors;

/// What the backend needs to know to build sessions.
#[derive(Debug, Clone)]
pub struct WebDriverBackendConfig {
	pub webdriver_url: String,
	pub headless: bool,
	pub cart_url: String,
	pub selectors: Selectors,
}

/// Builds one fresh WebDriver session per request.
pub struct WebDriverBackend {
	config: WebDriverBackendConfig,
}

impl WebDriverBackend {
	pub fn new(config: WebDriverBackendConfig) -> Self {
		Self { config }
	}
}

#[async_trait]
impl SessionBackend for WebDriverBackend {
	async fn build(&self, account_id: &str, credential: &Credential) -> Result<Arc<dyn PageSession>> {
		let cookies = stealth::parse_cookies(credential)?;

		let mut caps = DesiredCapabilities::chrome();
		if self.config.headless {
			caps.add_arg("--headless=new").map_err(wd_err)?;
		}
		caps.add_arg("--disable-blink-features=AutomationControlled")
			.map_err(wd_err)?;

		let driver = WebDriver::new(&self.config.webdriver_url, caps)
			.await
			.map_err(|e| CoreError::SessionInvalid(format!("webdriver connect: {e}")))?;

		stealth::apply_stealth(&driver).await?;

		// Land on the storefront origin first; WebDriver only accepts
		// cookies for the current domain.
		driver.goto(&self.config.cart_url).await.map_err(wd_err)?;
		stealth::inject_cookies(&driver, &cookies).await?;
		driver.refresh().await.map_err(wd_err)?;

		let session = WebDriverSession {
			driver,
			cart_url: self.config.cart_url.clone(),
			selectors: self.config.selectors.clone(),
		};
		session.check_for_challenge().await?;

		info!(target = "cw.session", account = account_id, "session built");
		Ok(Arc::new(session))
	}
}

struct WebDriverSession {
	driver: WebDriver,
	cart_url: String,
	selectors: Selectors,
}

impl WebDriverSession {
	/// Classifies the current page: a login form or captcha interstitial
	/// anywhere is a risk signal, not a scrape failure.
	async fn check_for_challenge(&self) -> Result<()> {
		let url = self.driver.current_url().await.map_err(wd_err)?;
		let title = self.driver.title().await.unwrap_or_default().to_lowercase();
		let url = url.as_str().to_lowercase();

		if url.contains("captcha") || title.contains("captcha") || title.contains("verify") {
			return Err(CoreError::NeedsCaptcha);
		}
		if url.contains("/login") || url.contains("/signin") || title.contains("sign in") {
			return Err(CoreError::NeedsLogin);
		}
		Ok(())
	}
}

#[async_trait]
impl PageSession for WebDriverSession {
	async fn is_healthy(&self) -> bool {
		match self.driver.execute("return 1 + 1;", vec![]).await {
			Ok(ret) => ret.json() == &serde_json::json!(2),
			Err(err) => {
				debug!(target = "cw.session", error = %err, "health check failed");
				false
			}
		}
	}

	async fn open_cart(&self) -> Result<Arc<dyn CartView>> {
		self.driver.goto(&self.cart_url).await.map_err(wd_err)?;
		tokio::time::sleep(Duration::from_millis(500)).await;
		self.check_for_challenge().await?;
		Ok(Arc::new(WebDriverCartPage::new(
			self.driver.clone(),
			self.selectors.clone(),
		)))
	}

	async fn open_listing(&self, url: &str) -> Result<Arc<dyn ListingView>> {
		self.driver.goto(url).await.map_err(wd_err)?;
		tokio::time::sleep(Duration::from_millis(500)).await;
		self.check_for_challenge().await?;
		Ok(Arc::new(WebDriverListingPage::new(
			self.driver.clone(),
			self.selectors.clone(),
		)))
	}

	async fn add_to_cart(&self, listing_url: &str) -> Result<()> {
		self.driver.goto(listing_url).await.map_err(wd_err)?;
		tokio::time::sleep(Duration::from_millis(500)).await;
		self.check_for_challenge().await?;

		let button = self
			.driver
			.find(By::Css(self.selectors.add_to_cart_button.as_str()))
			.await
			.map_err(|_| CoreError::Page(format!("no add-to-cart control on {listing_url}")))?;
		button.click().await.map_err(wd_err)?;
		// Give the cart mutation time to land before the next step.
		tokio::time::sleep(Duration::from_millis(800)).await;
		self.check_for_challenge().await
	}

	async fn close(&self) {
		if let Err(err) = self.driver.clone().quit().await {
			debug!(target = "cw.session", error = %err, "quit failed");
		}
	}
}

pub(super) fn wd_err(err: thirtyfour::error::WebDriverError) -> CoreError {
	CoreError::Page(err.to_string())
}
