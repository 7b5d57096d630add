//! Messaging abstractions: inbound event model and the outbound port.

pub mod port;
pub mod throttled;
pub mod types;
