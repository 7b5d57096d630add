//! Content blocklist: loading, matching and live reload.
//!
//! ```text
//! config.yaml write
//!     → watcher.rs (notify event, settle, coalesce)
//!     → store.rs (read, parse, compile; all-or-nothing)
//!     → RuleStore swaps Arc<RuleSet>
//!     → engine.rs classifies the next message against the new set
//! ```

pub mod engine;
pub mod store;
pub mod watcher;

pub use engine::{classify, first_match, BlockReason};
pub use store::{ConfigDocument, RuleSet, RuleStore};
pub use watcher::RuleWatcher;
