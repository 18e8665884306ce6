//! The coordinator process: agent hub + scheduler + local execution.

use std::sync::Arc;

use anyhow::Context;
use cw_core::{PauseCoordinator, SessionManager};
use cw_hub::{Hub, HubConfig, hub_router};
use cw_sched::{
	AccountStore, JobQueue, MemoryAccountStore, MemoryQueue, MemoryResultSink, ResultSink, Scheduler,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::browser::{WebDriverBackend, WebDriverBackendConfig};
use crate::cli::CoordinatorArgs;
use crate::config::Config;
use crate::error::Result;
use crate::executor::{FleetExecutor, LocalExec};

pub async fn run(config: Config, args: CoordinatorArgs) -> Result<()> {
	let listen = args.listen.unwrap_or_else(|| config.listen.clone());

	// Accounts this coordinator owns locally come from config; the
	// in-memory store is the single-process stand-in for the relational
	// layer.
	let store = Arc::new(MemoryAccountStore::new());
	for account in &config.accounts {
		match config.account_record(&account.id) {
			Ok(record) => store.add_account(record),
			Err(err) => {
				warn!(target = "cw", account = %account.id, error = %err, "skipping account");
			}
		}
	}
	info!(target = "cw", accounts = config.accounts.len(), "account store loaded");

	let hub = Hub::new(HubConfig {
		shared_credential: config.shared_credential.clone(),
		..Default::default()
	});

	let backend = WebDriverBackend::new(WebDriverBackendConfig {
		webdriver_url: config.webdriver_url.clone(),
		headless: config.headless,
		cart_url: config.cart_url.clone(),
		selectors: config.selectors.clone(),
	});
	let sessions = Arc::new(SessionManager::new(Arc::new(backend)));
	let pause = Arc::new(PauseCoordinator::new());
	let local = Arc::new(LocalExec::new(
		Arc::clone(&sessions),
		pause,
		Arc::clone(&store) as Arc<dyn AccountStore>,
		config.collector_config(),
		config.enumerator_config(),
	));
	let executor = Arc::new(FleetExecutor::new(Arc::clone(&hub), local));

	let queue = Arc::new(MemoryQueue::new());
	let sink = Arc::new(MemoryResultSink::new());
	let scheduler = Scheduler::new(
		Arc::clone(&store) as Arc<dyn AccountStore>,
		Arc::clone(&queue) as Arc<dyn JobQueue>,
		executor,
		Arc::clone(&sink) as Arc<dyn ResultSink>,
		config.scheduler_config()?,
	);

	// Long-lived loops: liveness pings, the queue's single worker, and
	// the scheduler's poll loop.
	tokio::spawn(Arc::clone(&hub).run_liveness());
	{
		let queue = Arc::clone(&queue);
		let processor = scheduler.processor();
		tokio::spawn(async move { queue.run_worker(processor).await });
	}
	tokio::spawn(Arc::clone(&scheduler).run());

	let app = hub_router(Arc::clone(&hub));
	let listener = TcpListener::bind(&listen)
		.await
		.with_context(|| format!("failed to bind {listen}"))?;
	info!(target = "cw", %listen, "coordinator listening");

	tokio::select! {
		result = axum::serve(listener, app.into_make_service()) => {
			result.context("coordinator server error")?;
		}
		_ = tokio::signal::ctrl_c() => {
			info!(target = "cw", "shutting down");
			sessions.dispose_all().await;
		}
	}

	Ok(())
}
