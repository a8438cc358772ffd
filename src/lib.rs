//! Pullstage - demand-driven producer for push-delivered messages
//!
//! Bridges an asynchronously arriving message stream (an MQTT subscription)
//! into a pull-based protocol where the consumer asks for a bounded number
//! of messages at a time.
//!
//! ```text
//! [broker] --> [source] --> [buffer] --> [producer] --> [consumer]
//!                                           ^               |
//!                                           +----demand-----+
//! ```

pub mod buffer;
pub mod config;
pub mod message;
pub mod producer;
pub mod source;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use message::{Message, QualityOfService};
