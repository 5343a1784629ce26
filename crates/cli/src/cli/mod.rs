#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Root CLI for polyparse.
#[derive(Parser, Debug)]
#[command(name = "polyparse")]
#[command(about = "Polyglot parsing service - per-language driver pools behind one socket")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to $POLYPARSE_CONFIG, then the user config dir)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Unix socket of the daemon
	#[arg(long, global = true, value_name = "PATH", conflicts_with = "listen")]
	pub socket: Option<PathBuf>,

	/// TCP address of the daemon instead of a socket
	#[arg(long, global = true, value_name = "ADDR")]
	pub listen: Option<String>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the daemon in the foreground.
	Serve(ServeArgs),
	/// Parse a file through the daemon and print the response as JSON.
	Parse(ParseArgs),
	/// Install a driver image for a language.
	Install(InstallArgs),
	/// Stop and forget a language's driver pool.
	Remove(RemoveArgs),
	/// List driver pools.
	Drivers(DriversArgs),
	/// Ask the daemon to shut down.
	Stop,
	/// Check that the daemon is reachable.
	Ping,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// Extra directory searched for `exec://` drivers (repeatable)
	#[arg(long = "search-path", value_name = "DIR")]
	pub search_paths: Vec<PathBuf>,

	/// Minimum driver instances per language
	#[arg(long, value_name = "N")]
	pub min_instances: Option<usize>,

	/// Maximum driver instances per language
	#[arg(long, value_name = "N")]
	pub max_instances: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
	/// Source file to parse
	#[arg(value_name = "FILE")]
	pub file: PathBuf,

	/// Language to parse as (detected from the file when omitted)
	#[arg(short, long, value_name = "LANG")]
	pub language: Option<String>,

	/// Per-request parse deadline
	#[arg(long, value_name = "MS")]
	pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
	#[arg(value_name = "LANG")]
	pub language: String,

	/// Image reference, e.g. exec://python-driver or file:///opt/drivers/go
	#[arg(value_name = "IMAGE")]
	pub image: String,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
	#[arg(value_name = "LANG")]
	pub language: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DriversArgs {
	/// Print JSON instead of a table
	#[arg(long)]
	pub json: bool,
}
