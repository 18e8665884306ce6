//! Persistence collaborator contracts.
//!
//! The core never mutates account business fields itself: it reads
//! credentials and agent bindings, and reports outcomes upward. These
//! traits are the whole surface the relational layer has to implement;
//! the in-memory versions back tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use cw_core::Credential;
use cw_protocol::{CartSnapshot, ScrapeReport, SkuVariant};
use parking_lot::Mutex;

use crate::error::Result;

/// What the scheduler needs to know about one active account.
#[derive(Debug, Clone)]
pub struct AccountRecord {
	pub account_id: String,
	pub credential: Credential,
	/// Agent explicitly bound to this account, if any.
	pub assigned_agent: Option<String>,
	/// User who owns the account; their preferred agent is the routing
	/// fallback.
	pub owner_user: Option<String>,
}

/// Outcome of one scrape attempt, reported upward verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
	Success,
	NeedsLogin,
	NeedsCaptcha,
	Error(String),
}

/// Read surface plus outcome reporting against the account store.
#[async_trait]
pub trait AccountStore: Send + Sync {
	/// Returns the account when it exists and is active.
	async fn find_active(&self, account_id: &str) -> Result<Option<AccountRecord>>;

	/// Ids of every active account, for the polling loop.
	async fn list_active(&self) -> Result<Vec<String>>;

	/// The owning user's preferred agent, if configured.
	async fn preferred_agent(&self, owner_user: &str) -> Result<Option<String>>;

	async fn record_outcome(&self, account_id: &str, outcome: ScrapeOutcome) -> Result<()>;

	/// Marks the account inactive (risk signals; not auto-retried).
	async fn disable(&self, account_id: &str, reason: &str) -> Result<()>;

	/// Raises an operator alert; delivery is the consumer's business.
	async fn raise_alert(&self, account_id: &str, message: &str) -> Result<()>;
}

/// Where finished scrape payloads go.
#[async_trait]
pub trait ResultSink: Send + Sync {
	async fn cart_snapshot(
		&self,
		account_id: &str,
		snapshot: CartSnapshot,
		report: ScrapeReport,
	) -> Result<()>;

	async fn listing_variants(
		&self,
		account_id: &str,
		listing_url: &str,
		variants: Vec<SkuVariant>,
	) -> Result<()>;
}

/// In-memory account store.
#[derive(Default)]
pub struct MemoryAccountStore {
	state: Mutex<MemoryAccounts>,
}

#[derive(Default)]
struct MemoryAccounts {
	accounts: HashMap<String, AccountRecord>,
	disabled: HashMap<String, String>,
	preferred_agents: HashMap<String, String>,
	outcomes: Vec<(String, ScrapeOutcome)>,
	alerts: Vec<(String, String)>,
}

impl MemoryAccountStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_account(&self, record: AccountRecord) {
		self.state
			.lock()
			.accounts
			.insert(record.account_id.clone(), record);
	}

	pub fn set_preferred_agent(&self, owner_user: &str, agent_id: &str) {
		self.state
			.lock()
			.preferred_agents
			.insert(owner_user.to_string(), agent_id.to_string());
	}

	pub fn outcomes(&self) -> Vec<(String, ScrapeOutcome)> {
		self.state.lock().outcomes.clone()
	}

	pub fn alerts(&self) -> Vec<(String, String)> {
		self.state.lock().alerts.clone()
	}

	pub fn is_disabled(&self, account_id: &str) -> bool {
		self.state.lock().disabled.contains_key(account_id)
	}
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
	async fn find_active(&self, account_id: &str) -> Result<Option<AccountRecord>> {
		let state = self.state.lock();
		if state.disabled.contains_key(account_id) {
			return Ok(None);
		}
		Ok(state.accounts.get(account_id).cloned())
	}

	async fn list_active(&self) -> Result<Vec<String>> {
		let state = self.state.lock();
		let mut ids: Vec<String> = state
			.accounts
			.keys()
			.filter(|id| !state.disabled.contains_key(*id))
			.cloned()
			.collect();
		ids.sort();
		Ok(ids)
	}

	async fn preferred_agent(&self, owner_user: &str) -> Result<Option<String>> {
		Ok(self.state.lock().preferred_agents.get(owner_user).cloned())
	}

	async fn record_outcome(&self, account_id: &str, outcome: ScrapeOutcome) -> Result<()> {
		self.state
			.lock()
			.outcomes
			.push((account_id.to_string(), outcome));
		Ok(())
	}

	async fn disable(&self, account_id: &str, reason: &str) -> Result<()> {
		self.state
			.lock()
			.disabled
			.insert(account_id.to_string(), reason.to_string());
		Ok(())
	}

	async fn raise_alert(&self, account_id: &str, message: &str) -> Result<()> {
		self.state
			.lock()
			.alerts
			.push((account_id.to_string(), message.to_string()));
		Ok(())
	}
}

/// In-memory result sink.
#[derive(Default)]
pub struct MemoryResultSink {
	snapshots: Mutex<Vec<(String, CartSnapshot, ScrapeReport)>>,
	variants: Mutex<Vec<(String, String, Vec<SkuVariant>)>>,
}

impl MemoryResultSink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot_count(&self) -> usize {
		self.snapshots.lock().len()
	}

	pub fn last_report(&self) -> Option<ScrapeReport> {
		self.snapshots.lock().last().map(|(_, _, r)| *r)
	}
}

#[async_trait]
impl ResultSink for MemoryResultSink {
	async fn cart_snapshot(
		&self,
		account_id: &str,
		snapshot: CartSnapshot,
		report: ScrapeReport,
	) -> Result<()> {
		self.snapshots
			.lock()
			.push((account_id.to_string(), snapshot, report));
		Ok(())
	}

	async fn listing_variants(
		&self,
		account_id: &str,
		listing_url: &str,
		variants: Vec<SkuVariant>,
	) -> Result<()> {
		self.variants
			.lock()
			.push((account_id.to_string(), listing_url.to_string(), variants));
		Ok(())
	}
}
