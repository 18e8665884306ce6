//! Pairing-code management against a running coordinator.

use cw_protocol::{PairNewRequest, PairingCode};

use crate::cli::{PairArgs, PairCommand};
use crate::config::Config;
use crate::error::Result;

pub async fn run(config: Config, args: PairArgs) -> Result<()> {
	match args.command {
		PairCommand::New { user, coordinator } => {
			let base = coordinator.unwrap_or_else(|| config.coordinator_url.clone());
			let url = format!("{}/agents/pair/new", base.trim_end_matches('/'));
			let code: PairingCode = reqwest::Client::new()
				.post(&url)
				.json(&PairNewRequest {
					owner_user: user.clone(),
				})
				.send()
				.await?
				.json()
				.await?;

			println!("pairing code: {}", code.code);
			println!("owner:        {}", code.owner_user);
			println!("expires at:   {} (unix)", code.expires_at);
			println!();
			println!("on the agent machine, run:");
			println!("  cw agent --coordinator {base} --pair {}", code.code);
			Ok(())
		}
	}
}
