//! Core domain + application logic for the share-link relay bot.
//!
//! This crate is framework-agnostic. Telegram and the resolution API live
//! behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod gate;
pub mod logging;
pub mod messaging;
pub mod progress;
pub mod relay;
pub mod resolver;
pub mod scratch;
pub mod supervisor;
pub mod sweeper;
pub mod transfer;
pub mod usage;
pub mod utils;
pub mod views;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
