//! Core domain + application logic for the Slack GPT relay bot.
//!
//! This crate is framework-agnostic. Slack and the completion API live behind
//! ports (traits) implemented in adapter crates.

pub mod audit;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod filter;
pub mod formatting;
pub mod logging;
pub mod messaging;

pub use errors::{Error, Result};
