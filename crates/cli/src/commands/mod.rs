pub mod agent;
pub mod coordinator;
pub mod pair;
pub mod scrape;
pub mod status;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = Config::load(cli.config.as_deref())?;

	match cli.command {
		Command::Coordinator(args) => coordinator::run(config, args).await,
		Command::Agent(args) => agent::run(config, args).await,
		Command::Pair(args) => pair::run(config, args).await,
		Command::Status(args) => status::run(config, args).await,
		Command::Cart(args) => scrape::cart(config, args).await,
		Command::Variants(args) => scrape::variants(config, args).await,
	}
}
