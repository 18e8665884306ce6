//! Config file loading.
//!
//! One JSON file drives every role of the binary. Every field has a
//! serde default so a missing file or a sparse file both work; the
//! storefront selector set and the end-of-list marker phrases live here
//! because they are site-specific pattern matches, not code contracts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cw_core::Credential;
use cw_core::cart::CartCollectorConfig;
use cw_core::sku::VariantEnumeratorConfig;
use cw_sched::{AccountRecord, QuietHours, SchedulerConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CwError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Coordinator listen address (hub WebSocket + admin endpoints).
	pub listen: String,
	/// Coordinator base URL as seen from agents and operator commands.
	pub coordinator_url: String,
	/// Fleet-wide agent credential; unset means pairing-only.
	pub shared_credential: Option<String>,
	/// This machine's agent identity.
	pub agent_id: String,
	/// WebDriver endpoint (chromedriver) used for browser work.
	pub webdriver_url: String,
	pub headless: bool,
	/// Base cart re-scrape interval in seconds.
	pub base_interval_secs: u64,
	/// Daily suppression window, `"HH:MM-HH:MM"`, wrapping allowed.
	pub quiet_hours: Option<String>,
	/// Storefront cart page URL.
	pub cart_url: String,
	/// Trailing phrases that mark the legitimate end of the cart list.
	pub end_markers: Vec<String>,
	/// Cap on enumerated variants per listing.
	pub max_variants: usize,
	/// Accounts this process can execute locally.
	pub accounts: Vec<AccountConfig>,
	pub selectors: Selectors,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:9800".into(),
			coordinator_url: "http://127.0.0.1:9800".into(),
			shared_credential: None,
			agent_id: default_agent_id(),
			webdriver_url: "http://127.0.0.1:9515".into(),
			headless: true,
			base_interval_secs: 1800,
			quiet_hours: None,
			cart_url: "https://shop.example/cart".into(),
			end_markers: vec!["no more items".into(), "recommended for you".into()],
			max_variants: 200,
			accounts: Vec::new(),
			selectors: Selectors::default(),
		}
	}
}

/// One locally executable account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
	pub id: String,
	/// File holding the account's cookie jar (JSON array).
	pub cookies_file: PathBuf,
	#[serde(default)]
	pub assigned_agent: Option<String>,
	#[serde(default)]
	pub owner_user: Option<String>,
}

/// Storefront CSS selectors. Site-specific and expected to rot; kept in
/// config so a DOM change is an ops fix, not a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Selectors {
	pub cart_list: String,
	pub cart_item: String,
	pub cart_total_hint: String,
	pub cart_trailing: String,
	pub option_group: String,
	pub option_node: String,
	pub option_disabled_class: String,
	pub option_selected_class: String,
	pub price: String,
	pub original_price: String,
	pub sku_container: String,
	pub thumbnail: String,
	pub add_to_cart_button: String,
}

impl Default for Selectors {
	fn default() -> Self {
		Self {
			cart_list: "[data-role=cart-list]".into(),
			cart_item: "[data-role=cart-item]".into(),
			cart_total_hint: "[data-role=cart-count]".into(),
			cart_trailing: "[data-role=list-end]".into(),
			option_group: "[data-role=sku-group]".into(),
			option_node: "[data-role=sku-option]".into(),
			option_disabled_class: "disabled".into(),
			option_selected_class: "selected".into(),
			price: "[data-role=price-current]".into(),
			original_price: "[data-role=price-original]".into(),
			sku_container: "[data-sku-id]".into(),
			thumbnail: "[data-role=sku-thumb] img".into(),
			add_to_cart_button: "[data-role=add-to-cart]".into(),
		}
	}
}

impl Config {
	/// Loads from `path`, or from the platform config dir, or defaults.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		match path {
			Some(path) => {
				if !path.exists() {
					return Err(CwError::ConfigNotFound(path.to_path_buf()));
				}
				Self::read(path)
			}
			None => {
				let path = default_config_path();
				if path.exists() {
					Self::read(&path)
				} else {
					debug!(target = "cw", "no config file, using defaults");
					Ok(Self::default())
				}
			}
		}
	}

	fn read(path: &Path) -> Result<Self> {
		let raw = fs::read_to_string(path)?;
		let config: Config =
			serde_json::from_str(&raw).map_err(|e| CwError::Config(format!("{}: {e}", path.display())))?;
		Ok(config)
	}

	pub fn base_interval(&self) -> Duration {
		Duration::from_secs(self.base_interval_secs.max(60))
	}

	pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
		let quiet_hours = match &self.quiet_hours {
			Some(spec) => Some(
				QuietHours::parse(spec)
					.ok_or_else(|| CwError::Config(format!("bad quietHours: {spec:?}")))?,
			),
			None => None,
		};
		Ok(SchedulerConfig {
			base_interval: self.base_interval(),
			quiet_hours,
			..Default::default()
		})
	}

	pub fn collector_config(&self) -> CartCollectorConfig {
		CartCollectorConfig {
			end_markers: self.end_markers.clone(),
			..Default::default()
		}
	}

	pub fn enumerator_config(&self) -> VariantEnumeratorConfig {
		VariantEnumeratorConfig {
			max_variants: self.max_variants,
			..Default::default()
		}
	}

	pub fn account(&self, account_id: &str) -> Result<&AccountConfig> {
		self.accounts
			.iter()
			.find(|a| a.id == account_id)
			.ok_or_else(|| CwError::UnknownAccount(account_id.to_string()))
	}

	/// Builds the scheduler-facing record for a configured account,
	/// loading its credential material from disk.
	pub fn account_record(&self, account_id: &str) -> Result<AccountRecord> {
		let account = self.account(account_id)?;
		let cookies_json = fs::read_to_string(&account.cookies_file).map_err(|e| {
			CwError::Config(format!(
				"cookies file {}: {e}",
				account.cookies_file.display()
			))
		})?;
		Ok(AccountRecord {
			account_id: account.id.clone(),
			credential: Credential { cookies_json },
			assigned_agent: account.assigned_agent.clone(),
			owner_user: account.owner_user.clone(),
		})
	}
}

/// Persistent per-agent token minted by pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
	pub agent_id: String,
	pub token: String,
	pub owner_user: String,
}

pub fn default_config_path() -> PathBuf {
	config_dir().join("cartwatch.json")
}

pub fn token_path() -> PathBuf {
	config_dir().join("agent-token.json")
}

fn config_dir() -> PathBuf {
	dirs::config_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join("cartwatch")
}

pub fn load_token() -> Option<StoredToken> {
	let raw = fs::read_to_string(token_path()).ok()?;
	serde_json::from_str(&raw).ok()
}

pub fn save_token(token: &StoredToken) -> Result<()> {
	let path = token_path();
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(&path, serde_json::to_string_pretty(token)?)?;
	Ok(())
}

fn default_agent_id() -> String {
	std::env::var("HOSTNAME")
		.ok()
		.filter(|h| !h.is_empty())
		.map(|h| format!("agent-{h}"))
		.unwrap_or_else(|| "agent-local".into())
}
