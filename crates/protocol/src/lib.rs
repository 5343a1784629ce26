//! Wire types for the polyparse dispatch service.
//!
//! These are the shapes exchanged between callers, the dispatch core, and the
//! language driver processes. They carry no behavior beyond (de)serialization
//! and a couple of constructors.
//!
//! # Main Types
//!
//! - [`ParseRequest`] - "parse this source file", optionally naming the language
//! - [`ParseResponse`] - status, error strings, and the syntax tree
//! - [`DriverInfo`] - snapshot of one language's driver pool

pub mod driver;
pub mod parse;

pub use driver::DriverInfo;
pub use parse::{DecodeError, Encoding, ParseRequest, ParseResponse, Status};
