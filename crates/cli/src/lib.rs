//! Daemon and command-line client for polyparse.
//!
//! `polyparse serve` owns a [`polyparse::Registry`] and answers newline-delimited
//! JSON requests on a Unix socket or TCP address. Every other subcommand is a thin
//! client of that daemon.

pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
