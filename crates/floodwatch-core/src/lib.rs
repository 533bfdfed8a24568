//! Core domain + application logic for floodwatch.
//!
//! This crate is transport-agnostic. The feed, the report database and the
//! outbound reply channel live behind ports (traits) implemented in adapter
//! crates.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod feed;
pub mod ledger;
pub mod logging;
pub mod memory;
pub mod messaging;
pub mod persistence;
pub mod ports;
pub mod reply_gate;
pub mod source;
pub mod supervisor;
pub mod utils;

pub use errors::{Error, Result};
