//! The remote scrape agent.

use std::sync::Arc;
use std::time::Duration;

use cw_core::{PauseCoordinator, SessionManager};
use cw_hub::{AgentClient, AgentCredential, ClientExit};
use cw_protocol::{PairRedeemRequest, PairRedeemResponse};
use cw_sched::{AccountStore, MemoryAccountStore};
use tracing::{info, warn};

use crate::browser::{WebDriverBackend, WebDriverBackendConfig};
use crate::cli::AgentArgs;
use crate::config::{self, Config, StoredToken};
use crate::error::{CwError, Result};
use crate::executor::{LocalExec, ScrapeHandler};

const RECONNECT_FLOOR: Duration = Duration::from_secs(2);
const RECONNECT_CEILING: Duration = Duration::from_secs(60);

pub async fn run(config: Config, args: AgentArgs) -> Result<()> {
	let coordinator = args
		.coordinator
		.clone()
		.unwrap_or_else(|| config.coordinator_url.clone());

	let agent_id = args
		.agent_id
		.clone()
		.or_else(|| config::load_token().map(|t| t.agent_id))
		.unwrap_or_else(|| config.agent_id.clone());

	if let Some(code) = &args.pair {
		pair(&coordinator, &agent_id, code).await?;
	}

	let key = resolve_key(&config, &agent_id)?;

	// The agent executes only its own configured accounts.
	let store = Arc::new(MemoryAccountStore::new());
	for account in &config.accounts {
		match config.account_record(&account.id) {
			Ok(record) => store.add_account(record),
			Err(err) => warn!(target = "cw.agent", account = %account.id, error = %err, "skipping account"),
		}
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
		Arc::clone(&store) as Arc<dyn AccountStore>,
		config.collector_config(),
		config.enumerator_config(),
	));
	let handler = Arc::new(ScrapeHandler::new(local));

	let ws_url = ws_url(&coordinator);
	let client = AgentClient::new(
		ws_url.clone(),
		AgentCredential {
			agent_id: agent_id.clone(),
			key,
		},
		handler,
	);

	info!(target = "cw.agent", agent = %agent_id, url = %ws_url, "agent starting");
	let mut backoff = RECONNECT_FLOOR;
	loop {
		match client.run().await {
			Ok(ClientExit::Replaced) => {
				// Another connection took our identity; reconnecting
				// would just steal it back and forth forever.
				warn!(target = "cw.agent", "replaced by a newer connection, exiting");
				return Ok(());
			}
			Ok(ClientExit::AuthRejected) => {
				return Err(CwError::Pairing(
					"coordinator rejected our credential; re-pair with `cw agent --pair <code>`".into(),
				));
			}
			Ok(ClientExit::ConnectionLost) => {
				backoff = RECONNECT_FLOOR;
				info!(target = "cw.agent", "connection lost, reconnecting");
			}
			Err(err) => {
				warn!(target = "cw.agent", error = %err, backoff_secs = backoff.as_secs(), "connect failed");
			}
		}
		tokio::time::sleep(backoff).await;
		backoff = (backoff * 2).min(RECONNECT_CEILING);
	}
}

async fn pair(coordinator: &str, agent_id: &str, code: &str) -> Result<()> {
	let url = format!("{}/agents/pair", coordinator.trim_end_matches('/'));
	let response: PairRedeemResponse = reqwest::Client::new()
		.post(&url)
		.json(&PairRedeemRequest {
			code: code.to_string(),
			agent_id: agent_id.to_string(),
		})
		.send()
		.await?
		.json()
		.await?;

	match response {
		PairRedeemResponse::Paired { token, owner_user } => {
			config::save_token(&StoredToken {
				agent_id: agent_id.to_string(),
				token,
				owner_user: owner_user.clone(),
			})?;
			info!(target = "cw.agent", owner = %owner_user, "paired; token stored");
			Ok(())
		}
		PairRedeemResponse::Rejected { reason } => Err(CwError::Pairing(reason)),
	}
}

fn resolve_key(config: &Config, agent_id: &str) -> Result<String> {
	if let Some(token) = config::load_token() {
		if token.agent_id == agent_id {
			return Ok(token.token);
		}
	}
	config.shared_credential.clone().ok_or_else(|| {
		CwError::Pairing("no stored token and no shared credential configured".into())
	})
}

fn ws_url(coordinator: &str) -> String {
	let base = coordinator.trim_end_matches('/');
	let ws = if let Some(rest) = base.strip_prefix("https://") {
		format!("wss://{rest}")
	} else if let Some(rest) = base.strip_prefix("http://") {
		format!("ws://{rest}")
	} else {
		base.to_string()
	};
	format!("{ws}{}", cw_hub::server::AGENTS_WS_PATH)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ws_url_rewrites_scheme_and_appends_path() {
		assert_eq!(
			ws_url("http://coord.example:9800"),
			"ws://coord.example:9800/agents/ws"
		);
		assert_eq!(
			ws_url("https://coord.example/"),
			"wss://coord.example/agents/ws"
		);
	}
}
