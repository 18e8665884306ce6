//! Execution surfaces.
//!
//! [`LocalExec`] drives scrapes on this machine's own sessions;
//! [`FleetExecutor`] routes a scheduler job to the local engine or to a
//! remote agent through the hub; [`ScrapeHandler`] is the agent-side
//! dispatcher exposing the same local engine over the wire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_core::cart::{CartCollectorConfig, CollectOptions, collect};
use cw_core::sku::{VariantEnumeratorConfig, enumerate};
use cw_core::{CoreError, PauseCoordinator, SessionManager, bulk};
use cw_hub::{CallOptions, Hub, HubError, MethodHandler, ProgressReporter};
use cw_protocol::{
	CartAddParams, CartCollectParams, CartSnapshot, ListingVariantsParams, METHOD_CART_ADD,
	METHOD_CART_COLLECT, METHOD_LISTING_VARIANTS, Progress, RemoteError, SkuVariant, error_kind,
};
use cw_sched::{AccountStore, ExecError, ExecTarget, JobExecutor};
use serde_json::Value;
use tracing::{debug, info};

/// How long a cart read waits for a bulk run to reach a safe point
/// before proceeding without exclusivity.
const BORROW_TIMEOUT: Duration = Duration::from_secs(15);

/// Coordinator-side wait budget for one remote scrape.
const REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Scrape engine over this process's own sessions.
pub struct LocalExec {
	sessions: Arc<SessionManager>,
	pause: Arc<PauseCoordinator>,
	accounts: Arc<dyn AccountStore>,
	collector: CartCollectorConfig,
	enumerator: VariantEnumeratorConfig,
}

impl LocalExec {
	pub fn new(
		sessions: Arc<SessionManager>,
		pause: Arc<PauseCoordinator>,
		accounts: Arc<dyn AccountStore>,
		collector: CartCollectorConfig,
		enumerator: VariantEnumeratorConfig,
	) -> Self {
		Self {
			sessions,
			pause,
			accounts,
			collector,
			enumerator,
		}
	}

	async fn session_for(&self, account_id: &str) -> cw_core::Result<Arc<dyn cw_core::PageSession>> {
		let record = self
			.accounts
			.find_active(account_id)
			.await
			.map_err(|e| CoreError::Page(e.to_string()))?
			.ok_or_else(|| CoreError::Page(format!("account {account_id} not active")))?;
		self.sessions.get_or_create(account_id, &record.credential).await
	}

	pub async fn collect_cart(&self, params: &CartCollectParams) -> cw_core::Result<CartSnapshot> {
		let account_id = &params.account_id;
		// Borrow the session from any bulk run at a safe point. Granted
		// or not, the read proceeds; exclusivity is best-effort.
		let borrowed = self.pause.request_pause(account_id, BORROW_TIMEOUT).await;
		let result = self.collect_cart_inner(params).await;
		if borrowed {
			self.pause.resume(account_id);
		}
		result
	}

	async fn collect_cart_inner(&self, params: &CartCollectParams) -> cw_core::Result<CartSnapshot> {
		let options = CollectOptions {
			expected_listing_ids: params.expected_listing_ids.iter().cloned().collect(),
		};
		// One transparent rebuild on an invalid session; anything past
		// that is a real failure.
		match self.try_collect(&params.account_id, &options).await {
			Err(CoreError::SessionInvalid(reason)) => {
				info!(
					target = "cw.session",
					account = %params.account_id,
					%reason,
					"session invalid, rebuilding once"
				);
				self.sessions.dispose(&params.account_id).await;
				self.try_collect(&params.account_id, &options).await
			}
			other => other,
		}
	}

	async fn try_collect(
		&self,
		account_id: &str,
		options: &CollectOptions,
	) -> cw_core::Result<CartSnapshot> {
		let session = self.session_for(account_id).await?;
		let view = session.open_cart().await?;
		collect(view.as_ref(), &self.collector, options).await
	}

	pub async fn enumerate_listing(
		&self,
		account_id: &str,
		listing_url: &str,
	) -> cw_core::Result<Vec<SkuVariant>> {
		let session = self.session_for(account_id).await?;
		let view = session.open_listing(listing_url).await?;
		enumerate(view.as_ref(), &self.enumerator).await
	}

	pub async fn bulk_add(
		&self,
		account_id: &str,
		listing_urls: &[String],
		on_progress: &mut bulk::BulkProgressFn<'_>,
	) -> cw_core::Result<Progress> {
		let session = self.session_for(account_id).await?;
		bulk::bulk_add(session.as_ref(), &self.pause, account_id, listing_urls, on_progress).await
	}
}

/// Routes scheduler jobs to the right execution surface.
pub struct FleetExecutor {
	hub: Arc<Hub>,
	local: Arc<LocalExec>,
}

impl FleetExecutor {
	pub fn new(hub: Arc<Hub>, local: Arc<LocalExec>) -> Self {
		Self { hub, local }
	}
}

#[async_trait]
impl JobExecutor for FleetExecutor {
	fn agent_available(&self, agent_id: &str) -> bool {
		self.hub.is_connected(agent_id)
	}

	async fn collect_cart(
		&self,
		target: &ExecTarget,
		params: CartCollectParams,
	) -> std::result::Result<CartSnapshot, ExecError> {
		match target {
			ExecTarget::Local => self
				.local
				.collect_cart(&params)
				.await
				.map_err(|e| ExecError::new(e.remote_kind(), e.to_string())),
			ExecTarget::Agent(agent_id) => {
				let account = params.account_id.clone();
				let opts = CallOptions {
					timeout: REMOTE_CALL_TIMEOUT,
					on_progress: Some(Arc::new(move |p: Progress, log: Option<String>| {
						debug!(
							target = "cw.hub",
							account = %account,
							current = p.current,
							total = p.total,
							log = log.as_deref().unwrap_or(""),
							"remote progress"
						);
					})),
				};
				let payload = serde_json::to_value(&params)
					.map_err(|e| ExecError::new(error_kind::PAGE, e.to_string()))?;
				let value = self
					.hub
					.call(agent_id, METHOD_CART_COLLECT, payload, opts)
					.await
					.map_err(exec_err_from_hub)?;
				serde_json::from_value(value)
					.map_err(|e| ExecError::new(error_kind::PAGE, format!("remote payload: {e}")))
			}
		}
	}
}

fn exec_err_from_hub(err: HubError) -> ExecError {
	match err {
		HubError::Remote { kind, message } => ExecError::new(kind, message),
		HubError::Timeout { method, ms } => {
			ExecError::new(error_kind::TIMEOUT, format!("{method} after {ms}ms"))
		}
		other => ExecError::new("not_connected", other.to_string()),
	}
}

/// Agent-side method dispatcher over the local engine.
pub struct ScrapeHandler {
	local: Arc<LocalExec>,
}

impl ScrapeHandler {
	pub fn new(local: Arc<LocalExec>) -> Self {
		Self { local }
	}
}

#[async_trait]
impl MethodHandler for ScrapeHandler {
	fn capabilities(&self) -> Vec<String> {
		vec![
			METHOD_CART_COLLECT.into(),
			METHOD_LISTING_VARIANTS.into(),
			METHOD_CART_ADD.into(),
		]
	}

	async fn handle(
		&self,
		method: &str,
		params: Value,
		progress: ProgressReporter,
	) -> std::result::Result<Value, RemoteError> {
		match method {
			METHOD_CART_COLLECT => {
				let params: CartCollectParams = decode(params)?;
				let snapshot = self
					.local
					.collect_cart(&params)
					.await
					.map_err(|e| RemoteError::from(&e))?;
				progress.report(
					Progress {
						total: snapshot.items.len() as u64,
						current: snapshot.items.len() as u64,
						success: snapshot.items.len() as u64,
						failed: 0,
					},
					None,
				);
				encode(&snapshot)
			}
			METHOD_LISTING_VARIANTS => {
				let params: ListingVariantsParams = decode(params)?;
				let variants = self
					.local
					.enumerate_listing(&params.account_id, &params.listing_url)
					.await
					.map_err(|e| RemoteError::from(&e))?;
				encode(&variants)
			}
			METHOD_CART_ADD => {
				let params: CartAddParams = decode(params)?;
				let reporter = progress.clone();
				let mut on_progress = move |p: Progress, url: &str| {
					reporter.report(p, Some(url.to_string()));
				};
				let summary = self
					.local
					.bulk_add(&params.account_id, &params.listing_urls, &mut on_progress)
					.await
					.map_err(|e| RemoteError::from(&e))?;
				encode(&summary)
			}
			other => Err(RemoteError::new(
				error_kind::UNSUPPORTED,
				format!("no such method: {other}"),
			)),
		}
	}
}

fn decode<T: serde::de::DeserializeOwned>(params: Value) -> std::result::Result<T, RemoteError> {
	serde_json::from_value(params)
		.map_err(|e| RemoteError::new(error_kind::PAGE, format!("bad params: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> std::result::Result<Value, RemoteError> {
	serde_json::to_value(value).map_err(|e| RemoteError::new(error_kind::PAGE, e.to_string()))
}
