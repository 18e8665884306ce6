//! One-off local scrapes for operators and debugging.

use std::sync::Arc;

use cw_core::{PauseCoordinator, SessionManager};
use cw_protocol::CartCollectParams;
use cw_sched::{AccountStore, MemoryAccountStore};

use crate::browser::{WebDriverBackend, WebDriverBackendConfig};
use crate::cli::{CartArgs, VariantsArgs};
use crate::config::Config;
use crate::error::Result;
use crate::executor::LocalExec;

fn local_exec(config: &Config) -> Result<(Arc<LocalExec>, Arc<SessionManager>)> {
	let store = Arc::new(MemoryAccountStore::new());
	for account in &config.accounts {
		store.add_account(config.account_record(&account.id)?);
	}
	let backend = WebDriverBackend::new(WebDriverBackendConfig {
		webdriver_url: config.webdriver_url.clone(),
		headless: config.headless,
		cart_url: config.cart_url.clone(),
		selectors: config.selectors.clone(),
	});
	let sessions = Arc::new(SessionManager::new(Arc::new(backend)));
	let local = Arc::new(LocalExec::new(
		Arc::clone(&sessions),
		Arc::new(PauseCoordinator::new()),
		store as Arc<dyn AccountStore>,
		config.collector_config(),
		config.enumerator_config(),
	));
	Ok((local, sessions))
}

pub async fn cart(config: Config, args: CartArgs) -> Result<()> {
	config.account(&args.account)?;
	let (local, sessions) = local_exec(&config)?;

	let params = CartCollectParams {
		account_id: args.account.clone(),
		expected_listing_ids: args.expected.clone(),
	};
	let result = local.collect_cart(&params).await;
	sessions.dispose_all().await;

	let snapshot = result?;
	println!("{}", serde_json::to_string_pretty(&snapshot)?);
	Ok(())
}

pub async fn variants(config: Config, args: VariantsArgs) -> Result<()> {
	config.account(&args.account)?;
	let (local, sessions) = local_exec(&config)?;

	let result = local.enumerate_listing(&args.account, &args.url).await;
	sessions.dispose_all().await;

	let variants = result?;
	println!("{}", serde_json::to_string_pretty(&variants)?);
	Ok(())
}
