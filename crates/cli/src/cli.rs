use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Cart price tracking across a fleet of browser agents.
#[derive(Debug, Parser)]
#[command(name = "cw", version, about)]
pub struct Cli {
	/// Increase log verbosity (-v, -vv)
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	pub verbose: u8,

	/// Path to the config file (default: platform config dir)
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Run the coordinator: agent hub, scheduler, and local execution
	Coordinator(CoordinatorArgs),
	/// Run a scrape agent connected to a coordinator
	Agent(AgentArgs),
	/// Manage agent pairing codes
	Pair(PairArgs),
	/// Show connected agents
	Status(StatusArgs),
	/// Collect one account's cart right now, locally
	Cart(CartArgs),
	/// Enumerate every variant of one listing, locally
	Variants(VariantsArgs),
}

#[derive(Debug, Args)]
pub struct CoordinatorArgs {
	/// Listen address for the agent hub and admin endpoints
	#[arg(long)]
	pub listen: Option<String>,
}

#[derive(Debug, Args)]
pub struct AgentArgs {
	/// Coordinator base URL, e.g. http://coordinator.example:9800
	#[arg(long)]
	pub coordinator: Option<String>,

	/// Identity to connect under (defaults to the configured agent id)
	#[arg(long)]
	pub agent_id: Option<String>,

	/// Redeem a pairing code before connecting; the minted token is
	/// stored for future runs
	#[arg(long)]
	pub pair: Option<String>,
}

#[derive(Debug, Args)]
pub struct PairArgs {
	#[command(subcommand)]
	pub command: PairCommand,
}

#[derive(Debug, Subcommand)]
pub enum PairCommand {
	/// Mint a single-use pairing code on the coordinator
	New {
		/// User the paired agent will belong to
		#[arg(long)]
		user: String,
		/// Coordinator admin base URL
		#[arg(long)]
		coordinator: Option<String>,
	},
}

#[derive(Debug, Args)]
pub struct StatusArgs {
	/// Coordinator admin base URL
	#[arg(long)]
	pub coordinator: Option<String>,
}

#[derive(Debug, Args)]
pub struct CartArgs {
	/// Account id from the config's accounts list
	#[arg(long)]
	pub account: String,

	/// Only wait for these listing ids (may repeat)
	#[arg(long = "expect")]
	pub expected: Vec<String>,
}

#[derive(Debug, Args)]
pub struct VariantsArgs {
	/// Account id from the config's accounts list
	#[arg(long)]
	pub account: String,

	/// Listing URL to enumerate
	#[arg(long)]
	pub url: String,
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn cli_definition_is_consistent() {
		Cli::command().debug_assert();
	}

	#[test]
	fn parses_coordinator_with_listen() {
		let cli = Cli::parse_from(["cw", "coordinator", "--listen", "0.0.0.0:9800"]);
		match cli.command {
			Command::Coordinator(args) => assert_eq!(args.listen.as_deref(), Some("0.0.0.0:9800")),
			other => panic!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn parses_repeated_expect_flags() {
		let cli = Cli::parse_from(["cw", "cart", "--account", "a1", "--expect", "l1", "--expect", "l2"]);
		match cli.command {
			Command::Cart(args) => assert_eq!(args.expected, vec!["l1", "l2"]),
			other => panic!("unexpected command {other:?}"),
		}
	}
}
