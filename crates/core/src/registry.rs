//! Language-keyed registry of driver pools.
//!
//! The registry is the single entry point for parse traffic. It resolves the
//! request's language, provisions the pool for it on first use, and forwards
//! the request. Pools are created at most once per language even under
//! concurrent first requests: each language owns a slot whose initializer
//! runs exactly once, and concurrent callers wait on that slot instead of
//! racing to build their own pool.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use polyparse_protocol::{DriverInfo, ParseRequest, ParseResponse};
use polyparse_runtime::{ImageInstaller, ImageRef, ImageTransport, WorkerLauncher};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::detect::{DefaultDetector, LanguageDetector};
use crate::error::{Error, Result};
use crate::pool::{DriverPool, PoolConfig};
use crate::scaling::{ScalingPolicy, UtilizationPolicy};

type PoolSlot = Arc<OnceCell<DriverPool>>;

/// Routes parse requests to per-language driver pools.
pub struct Registry {
	transport: ImageTransport,
	installer: Arc<dyn ImageInstaller>,
	launcher: Arc<dyn WorkerLauncher>,
	detector: Arc<dyn LanguageDetector>,
	policy: Arc<dyn ScalingPolicy>,
	pool_config: PoolConfig,
	pools: DashMap<String, PoolSlot>,
	closed: AtomicBool,
}

impl fmt::Debug for Registry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Registry")
			.field("transport", &self.transport)
			.field("policy", &self.policy)
			.field("pool_config", &self.pool_config)
			.field("languages", &self.languages())
			.field("closed", &self.closed.load(Ordering::SeqCst))
			.finish_non_exhaustive()
	}
}

impl Registry {
	/// Registry with the default detector, policy and pool timings.
	pub fn new(installer: Arc<dyn ImageInstaller>, launcher: Arc<dyn WorkerLauncher>) -> Self {
		RegistryBuilder::new(installer, launcher).build()
	}

	pub fn builder(installer: Arc<dyn ImageInstaller>, launcher: Arc<dyn WorkerLauncher>) -> RegistryBuilder {
		RegistryBuilder::new(installer, launcher)
	}

	/// Language a request will be served as: the explicit field when set,
	/// otherwise whatever the detector infers, otherwise empty.
	pub fn resolve(&self, request: &ParseRequest) -> String {
		if !request.language.is_empty() {
			return request.language.clone();
		}
		let content = request
			.decoded_content()
			.unwrap_or_else(|_| request.content.as_bytes().to_vec());
		let detected = self.detector.detect(&request.filename, &content);
		if let Some(language) = &detected {
			debug!(
				target = "polyparse.registry",
				filename = %request.filename,
				language = %language,
				"detected language"
			);
		}
		detected.unwrap_or_default()
	}

	/// Pool for `language`, provisioning it with the default image on first use.
	pub async fn ensure_pool(&self, language: &str) -> Result<DriverPool> {
		if self.is_closed() {
			return Err(Error::MissingDriver {
				language: language.to_string(),
				source: Box::new(Error::closed(language)),
			});
		}
		if let Some(pool) = self.pool(language) {
			return Ok(pool);
		}
		if language.is_empty() {
			return Err(Error::MissingDriver {
				language: String::new(),
				source: Box::new(Error::UnknownLanguage),
			});
		}

		let image = self.installer.resolve(self.transport, language);
		self.provision(language, image)
			.await
			.map(|(pool, _)| pool)
			.map_err(|source| Error::MissingDriver {
				language: language.to_string(),
				source: Box::new(source),
			})
	}

	/// Installs `image` as the driver for `language`.
	///
	/// Fails with [`Error::AlreadyInstalled`] when a pool for the language
	/// exists, whichever image it runs.
	pub async fn add_driver(&self, language: &str, image: &str) -> Result<()> {
		if self.pool(language).is_some() {
			return Err(Error::AlreadyInstalled {
				language: language.to_string(),
				image: image.to_string(),
			});
		}

		let reference = ImageRef::from_str(image).map_err(|source| Error::Runtime {
			language: language.to_string(),
			image: image.to_string(),
			source,
		})?;

		let (_, created) = self.provision(language, reference).await?;
		if !created {
			return Err(Error::AlreadyInstalled {
				language: language.to_string(),
				image: image.to_string(),
			});
		}
		Ok(())
	}

	/// Parses one request. Never fails: problems come back as a
	/// [`Status::Fatal`](polyparse_protocol::Status::Fatal) response.
	pub async fn dispatch(&self, mut request: ParseRequest) -> ParseResponse {
		let language = self.resolve(&request);
		if request.language.is_empty() {
			request.language.clone_from(&language);
		}

		let pool = match self.ensure_pool(&language).await {
			Ok(pool) => pool,
			Err(err) => {
				warn!(
					target = "polyparse.registry",
					filename = %request.filename,
					language = %language,
					error = %err,
					"no driver for request"
				);
				return ParseResponse::fatal([format!("error getting driver: {err}")]).with_language(language);
			}
		};

		match pool.parse(request).await {
			Ok(response) => response,
			Err(err) => {
				warn!(
					target = "polyparse.registry",
					language = %language,
					error = %err,
					"parse failed"
				);
				ParseResponse::fatal([format!("error parsing with driver: {err}")]).with_language(language)
			}
		}
	}

	/// Closes and forgets the pool for `language`.
	///
	/// A language whose pool is still being provisioned counts as not installed.
	pub async fn remove_driver(&self, language: &str) -> Result<()> {
		let removed = self.pools.remove_if(language, |_, slot| slot.get().is_some());
		let Some(pool) = removed.and_then(|(_, slot)| slot.get().cloned()) else {
			return Err(Error::NotInstalled {
				language: language.to_string(),
			});
		};
		info!(target = "polyparse.registry", language, "removing driver");
		pool.close().await
	}

	/// Snapshot of every provisioned pool, sorted by language.
	pub fn drivers(&self) -> Vec<DriverInfo> {
		let mut drivers: Vec<DriverInfo> = self
			.pools
			.iter()
			.filter_map(|entry| entry.value().get().map(DriverPool::info))
			.collect();
		drivers.sort_by(|a, b| a.language.cmp(&b.language));
		drivers
	}

	pub fn pool(&self, language: &str) -> Option<DriverPool> {
		self.pools
			.get(language)
			.and_then(|slot| slot.value().get().cloned())
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Closes every pool. Later requests are answered with a fatal
	/// "closed" response.
	///
	/// All pools are closed even when some fail; the first failure (by
	/// language order) is returned.
	pub async fn shutdown(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		let mut pools: Vec<DriverPool> = self
			.pools
			.iter()
			.filter_map(|entry| entry.value().get().cloned())
			.collect();
		pools.sort_by(|a, b| a.language().cmp(b.language()));

		info!(target = "polyparse.registry", pools = pools.len(), "shutting down");

		let results = join_all(pools.iter().map(DriverPool::close)).await;
		let mut first = None;
		for (pool, result) in pools.iter().zip(results) {
			if let Err(err) = result {
				warn!(
					target = "polyparse.registry",
					language = %pool.language(),
					error = %err,
					"failed to close driver pool"
				);
				first.get_or_insert(err);
			}
		}
		match first {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	fn languages(&self) -> Vec<String> {
		let mut languages: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
		languages.sort();
		languages
	}

	/// Creates the pool for `language` unless one exists. The boolean is
	/// true when this call created it.
	async fn provision(&self, language: &str, image: ImageRef) -> Result<(DriverPool, bool)> {
		if self.is_closed() {
			return Err(Error::closed(language));
		}

		let slot = Arc::clone(&self.pools.entry(language.to_string()).or_default());

		let mut created = false;
		let init = slot
			.get_or_try_init(|| {
				created = true;
				self.start_pool(language, image)
			})
			.await;
		let pool = match init {
			Ok(pool) => pool.clone(),
			Err(err) => {
				self.pools
					.remove_if(language, |_, current| Arc::ptr_eq(current, &slot) && current.get().is_none());
				return Err(err);
			}
		};

		if !created {
			return Ok((pool, false));
		}
		if self.is_closed() {
			let _ = pool.close().await;
			return Err(Error::closed(language));
		}

		// A failed attempt on this slot may have dropped it from the map while
		// this caller was still waiting on it.
		let current = match self.pools.entry(language.to_string()) {
			Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), &slot) => None,
			Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
			Entry::Vacant(entry) => {
				entry.insert(Arc::clone(&slot));
				None
			}
		};
		match current {
			None => Ok((pool, true)),
			Some(other) => {
				let _ = pool.close().await;
				match other.get() {
					Some(winner) => Ok((winner.clone(), false)),
					None => Err(Error::closed(language)),
				}
			}
		}
	}

	async fn start_pool(&self, language: &str, image: ImageRef) -> Result<DriverPool> {
		info!(target = "polyparse.registry", language, image = %image, "installing driver");

		self.installer
			.install(&image, false)
			.await
			.map_err(|source| Error::Runtime {
				language: language.to_string(),
				image: image.to_string(),
				source,
			})?;

		DriverPool::start(
			language,
			image,
			Arc::clone(&self.policy),
			self.pool_config.clone(),
			Arc::clone(&self.launcher),
		)
		.await
	}
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
	installer: Arc<dyn ImageInstaller>,
	launcher: Arc<dyn WorkerLauncher>,
	transport: ImageTransport,
	detector: Option<Arc<dyn LanguageDetector>>,
	policy: Option<Arc<dyn ScalingPolicy>>,
	pool_config: PoolConfig,
}

impl RegistryBuilder {
	pub fn new(installer: Arc<dyn ImageInstaller>, launcher: Arc<dyn WorkerLauncher>) -> Self {
		Self {
			installer,
			launcher,
			transport: ImageTransport::default(),
			detector: None,
			policy: None,
			pool_config: PoolConfig::default(),
		}
	}

	pub fn transport(mut self, transport: ImageTransport) -> Self {
		self.transport = transport;
		self
	}

	pub fn detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
		self.detector = Some(detector);
		self
	}

	pub fn policy(mut self, policy: Arc<dyn ScalingPolicy>) -> Self {
		self.policy = Some(policy);
		self
	}

	pub fn pool_config(mut self, config: PoolConfig) -> Self {
		self.pool_config = config;
		self
	}

	pub fn build(self) -> Registry {
		Registry {
			transport: self.transport,
			installer: self.installer,
			launcher: self.launcher,
			detector: self
				.detector
				.unwrap_or_else(|| Arc::new(DefaultDetector::default())),
			policy: self
				.policy
				.unwrap_or_else(|| Arc::new(UtilizationPolicy::default())),
			pool_config: self.pool_config,
			pools: DashMap::new(),
			closed: AtomicBool::new(false),
		}
	}
}
