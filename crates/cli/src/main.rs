use clap::Parser;
use cw_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}
