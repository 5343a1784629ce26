//! Polyparse runtime - driver images, worker launch, and stdio transport
//!
//! This crate provides the collaborators the dispatch core drives but does not
//! implement itself:
//!
//! - **Images**: naming and installing the artifact that runs a language driver
//! - **Launch**: starting a driver instance from an installed image
//! - **Workers**: the `{parse, close}` capability every driver instance exposes
//! - **Transport**: length-prefixed JSON frames over a child's stdio
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  polyparse   │  Registry, pools, scaling
//! └──────┬───────┘
//!        │ ImageInstaller / WorkerLauncher / Worker
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │ Image  │  │  Reference parsing, local install
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Launch │  │  Process spawn
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Frame  │  │  stdio framing
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod error;
pub mod image;
pub mod installer;
pub mod launcher;
pub mod process;
pub mod transport;
pub mod worker;

pub use error::{Error, Result};
pub use image::{ImageRef, ImageTransport};
pub use installer::{ImageInstaller, InstalledImage, LocalInstaller};
pub use launcher::{LaunchOptions, ProcessLauncher, WorkerLauncher};
pub use process::ProcessWorker;
pub use transport::{FrameReader, FrameWriter, MAX_FRAME_LEN};
pub use worker::{InProcessWorker, Worker, WorkerId, next_worker_id};
