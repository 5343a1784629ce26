use std::sync::Arc;

use anyhow::Context;
use polyparse::Registry;
use polyparse_runtime::{LaunchOptions, LocalInstaller, ProcessLauncher};
use tracing::info;

use crate::cli::ServeArgs;
use crate::config::ServerConfig;
use crate::daemon::{Daemon, Endpoint};
use crate::error::Result;

pub async fn run(mut config: ServerConfig, endpoint: Endpoint, args: ServeArgs) -> Result<()> {
	apply_overrides(&mut config, args);
	config.validate()?;

	let registry = Arc::new(build_registry(&config)?);

	for (language, image) in &config.drivers {
		registry
			.add_driver(language, image)
			.await
			.with_context(|| format!("Failed to install {language} driver from {image}"))?;
	}

	info!(
		target = "polyparse",
		drivers = config.drivers.len(),
		transport = %config.transport,
		"registry ready"
	);

	let daemon = Daemon::bind(Arc::clone(&registry), endpoint).await?;
	daemon.run().await?;
	Ok(())
}

fn apply_overrides(config: &mut ServerConfig, args: ServeArgs) {
	config.search_paths.extend(args.search_paths);
	if let Some(min) = args.min_instances {
		config.policy.min_instances = min;
	}
	if let Some(max) = args.max_instances {
		config.policy.max_instances = Some(max);
	}
}

pub(crate) fn build_registry(config: &ServerConfig) -> Result<Registry> {
	let installer = Arc::new(LocalInstaller::new(config.search_paths.clone()));
	let launcher = Arc::new(ProcessLauncher::new(Arc::clone(&installer), LaunchOptions::default()));

	Ok(Registry::builder(installer, launcher)
		.transport(config.transport)
		.policy(config.policy()?)
		.pool_config(config.pool_config())
		.build())
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	#[test]
	fn flags_override_config() {
		let mut config = ServerConfig {
			search_paths: vec![PathBuf::from("/etc/drivers")],
			..Default::default()
		};
		apply_overrides(
			&mut config,
			ServeArgs {
				search_paths: vec![PathBuf::from("/opt/drivers")],
				min_instances: Some(2),
				max_instances: Some(4),
			},
		);

		assert_eq!(
			config.search_paths,
			vec![PathBuf::from("/etc/drivers"), PathBuf::from("/opt/drivers")]
		);
		assert_eq!(config.policy.min_instances, 2);
		assert_eq!(config.policy.max_instances, Some(4));
	}

	#[tokio::test]
	async fn registry_uses_configured_policy() {
		let mut config = ServerConfig::default();
		config.policy.min_instances = 0;
		config.policy.max_instances = Some(3);

		let registry = build_registry(&config).unwrap();
		assert!(registry.drivers().is_empty());
		assert!(!registry.is_closed());
	}
}
