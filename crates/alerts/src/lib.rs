//! Alert rendering for the optimization pipeline.
//!
//! Takes the structured alert payloads produced by the core (rollback
//! alerts, sweep summaries) and renders them as Block Kit-style message
//! templates with a plain-text fallback. Delivery to a channel is a
//! collaborator concern; the only sink shipped here logs through `tracing`.

pub mod blocks;
pub mod messages;

pub use blocks::{Block, MessageBuilder, MessageTemplate, TextObject};
pub use messages::{render, TracingAlertSink};
