//! Request/response over plain channels
//!
//! Not a transport primitive: a request is an ordinary publish carrying a
//! correlation id, and the answer is an ordinary publish on a channel derived
//! from that id.

use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::broker::MessageBus;
use super::message::{Message, PublishMeta};
use crate::error::BridgeResult;

/// Channel a responder answers on for a given request
pub fn response_channel(channel: &str, correlation_id: &str) -> String {
    format!("{}:response:{}", channel, correlation_id)
}

impl MessageBus {
    /// Publish a request on `channel` and wait for its response
    ///
    /// The response subscription is in place before the request is published,
    /// so a responder that answers synchronously is not missed.
    pub fn request(
        &self,
        channel: &str,
        payload: Value,
        meta: PublishMeta,
        timeout: Option<Duration>,
    ) -> LocalBoxFuture<'static, BridgeResult<Message>> {
        let correlation_id = Uuid::now_v7().to_string();
        let reply_to = response_channel(channel, &correlation_id);
        debug!(%channel, %correlation_id, "MessageBus::request: called");

        let response = self.wait_for(&reply_to, timeout);
        self.publish_with(channel, payload, meta.with_correlation(correlation_id, reply_to));
        response
    }

    /// Answer `request` on its reply channel
    ///
    /// Returns false if the message carries no reply channel.
    pub fn reply(&self, request: &Message, payload: Value, meta: PublishMeta) -> bool {
        let Some(reply_to) = request.meta.reply_to.as_deref() else {
            debug!(channel = %request.channel, "MessageBus::reply: message has no reply channel");
            return false;
        };
        debug!(%reply_to, "MessageBus::reply: called");
        let meta = PublishMeta {
            correlation_id: request.meta.correlation_id.clone(),
            reply_to: None,
            ..meta
        };
        self.publish_with(reply_to, payload, meta);
        true
    }
}
