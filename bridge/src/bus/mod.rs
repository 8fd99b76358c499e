//! Message Bus
//!
//! Named broadcast channels with optional replay, wildcard subscriptions,
//! one-shot subscriptions, deadline-bounded waits, and a request/response
//! pattern built from those pieces.

mod broker;
mod message;
mod replay;
mod request;

pub use broker::{BusMetrics, MessageBus, WILDCARD};
pub use message::{Message, MessageMeta, PublishMeta};
pub use request::response_channel;
