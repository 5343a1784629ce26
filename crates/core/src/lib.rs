//! polyparse: routes parse requests to per-language driver pools
//!
//! A [`Registry`] maps language names to [`DriverPool`]s. The first request
//! for a language installs that language's driver image and starts a pool;
//! later requests reuse it. Each pool grows and shrinks between the bounds
//! of its [`ScalingPolicy`], and each worker serves one request at a time.
//!
//! # Examples
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use polyparse::{ParseRequest, Registry};
//! use polyparse_runtime::{LaunchOptions, LocalInstaller, ProcessLauncher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let installer = Arc::new(LocalInstaller::new(vec!["/opt/drivers".into()]));
//!     let launcher = Arc::new(ProcessLauncher::new(installer.clone(), LaunchOptions::default()));
//!     let registry = Registry::builder(installer, launcher).build();
//!
//!     let response = registry
//!         .dispatch(ParseRequest::new("main.go", "package main"))
//!         .await;
//!     println!("{:?}: {:?}", response.status, response.errors);
//!
//!     registry.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod detect;
pub mod error;
pub mod pool;
pub mod registry;
pub mod scaling;

pub use detect::{DefaultDetector, LanguageDetector};
pub use error::{Error, Result};
pub use pool::{DriverPool, PoolConfig, PoolStatus};
pub use polyparse_protocol::{DriverInfo, Encoding, ParseRequest, ParseResponse, Status};
pub use registry::{Registry, RegistryBuilder};
pub use scaling::{FixedPolicy, Observation, ScalingPolicy, UtilizationPolicy};
