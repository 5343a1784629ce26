mod client;
mod serve;

use crate::cli::{Cli, Commands};
use crate::config::ServerConfig;
use crate::daemon::{DaemonClient, Endpoint};
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = ServerConfig::load(cli.config.as_deref())?;
	let endpoint = Endpoint::resolve(
		cli.socket.or_else(|| config.socket.clone()),
		cli.listen.or_else(|| config.listen.clone()),
	);

	match cli.command {
		Commands::Serve(args) => serve::run(config, endpoint, args).await,
		Commands::Parse(args) => client::parse(&DaemonClient::new(endpoint), args).await,
		Commands::Install(args) => client::install(&DaemonClient::new(endpoint), args).await,
		Commands::Remove(args) => client::remove(&DaemonClient::new(endpoint), args).await,
		Commands::Drivers(args) => client::drivers(&DaemonClient::new(endpoint), args).await,
		Commands::Stop => client::stop(&DaemonClient::new(endpoint)).await,
		Commands::Ping => client::ping(&DaemonClient::new(endpoint)).await,
	}
}
