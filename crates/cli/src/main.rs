use std::error::Error as _;

use clap::Parser;
use polyparse_cli::{cli::Cli, commands, error::CliError, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		let code = err.exit_code();
		handle_error(&err);
		std::process::exit(code);
	}
}

fn handle_error(err: &CliError) {
	error!(target = "polyparse", error = %err, "command failed");

	eprintln!("error: {err}");
	let mut source = err.source();
	while let Some(cause) = source {
		eprintln!("  caused by: {cause}");
		source = cause.source();
	}
}
