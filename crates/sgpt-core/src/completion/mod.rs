//! Completion boundary: provider-agnostic chat turns and the client port.

pub mod client;
pub mod types;

pub use client::CompletionClient;
pub use types::{build_turns, Role, Turn};
