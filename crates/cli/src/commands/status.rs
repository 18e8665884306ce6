//! Connected-agent listing.

use serde::Deserialize;

use crate::cli::StatusArgs;
use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRow {
	agent_id: String,
	owner_user: Option<String>,
	capabilities: Vec<String>,
	last_seen_at: u64,
}

pub async fn run(config: Config, args: StatusArgs) -> Result<()> {
	let base = args
		.coordinator
		.unwrap_or_else(|| config.coordinator_url.clone());
	let url = format!("{}/agents", base.trim_end_matches('/'));
	let agents: Vec<AgentRow> = reqwest::Client::new().get(&url).send().await?.json().await?;

	if agents.is_empty() {
		println!("no agents connected");
		return Ok(());
	}

	let now = std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs();
	for agent in agents {
		let age = now.saturating_sub(agent.last_seen_at);
		println!(
			"{:<24} owner={:<12} seen={age}s ago  [{}]",
			agent.agent_id,
			agent.owner_user.as_deref().unwrap_or("-"),
			agent.capabilities.join(", "),
		);
	}
	Ok(())
}
