//! MessageBus implementation

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::message::{Message, PublishMeta};
use super::replay::ReplayBuffer;
use crate::config::ChannelOptions;
use crate::diagnostics::invoke_isolated;
use crate::error::{BridgeError, BridgeResult, CallbackKind, SubscriberError};
use crate::subscription::{DisposeOnDrop, Subscription};

/// Suffix that turns a subscription into a prefix match
pub const WILDCARD: char = '*';

type Callback = Rc<dyn Fn(&Message)>;

struct Subscriber {
    id: u64,
    callback: Callback,
    /// Set for once-subscribers, disposed when the single delivery is claimed
    once: Option<Subscription>,
}

#[derive(Default)]
struct Channel {
    subscribers: Vec<Subscriber>,
    replay: Option<ReplayBuffer>,
}

struct PatternSubscriber {
    prefix: String,
    subscriber: Subscriber,
}

/// Where a subscriber lives, for liveness checks during fan-out
#[derive(Clone, Copy, PartialEq, Eq)]
enum Group {
    Exact,
    Pattern,
}

/// Bus counters for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusMetrics {
    pub channels: usize,
    pub subscriptions: usize,
    pub published: u64,
    pub deliveries: u64,
    pub subscriber_errors: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct BusState {
    channels: HashMap<String, Channel>,
    patterns: Vec<PatternSubscriber>,
    next_id: u64,
    /// Messages waiting for the in-progress fan-out to finish
    queue: VecDeque<Message>,
    delivering: bool,
    published: u64,
    deliveries: u64,
    subscriber_errors: u64,
    timeouts: u64,
}

impl BusState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Check the target is still subscribed, removing it first if it is a once-subscriber
    ///
    /// `None` means skip delivery. `Some(Some(handle))` is a spent once-subscription.
    fn claim(&mut self, channel: &str, group: Group, id: u64) -> Option<Option<Subscription>> {
        match group {
            Group::Exact => {
                let ch = self.channels.get_mut(channel)?;
                let pos = ch.subscribers.iter().position(|s| s.id == id)?;
                if ch.subscribers[pos].once.is_some() {
                    return Some(ch.subscribers.remove(pos).once);
                }
                Some(None)
            }
            Group::Pattern => {
                let pos = self.patterns.iter().position(|p| p.subscriber.id == id)?;
                if self.patterns[pos].subscriber.once.is_some() {
                    return Some(self.patterns.remove(pos).subscriber.once);
                }
                Some(None)
            }
        }
    }
}

/// Named broadcast channels with replay
///
/// Delivery is synchronous. A publish issued from inside a callback is queued
/// and delivered after the current fan-out completes, so every channel sees
/// messages in publish order.
#[derive(Clone)]
pub struct MessageBus {
    state: Rc<RefCell<BusState>>,
    default_timeout: Duration,
    diagnostics_channel: Rc<str>,
}

impl MessageBus {
    pub fn new(default_timeout: Duration, diagnostics_channel: &str) -> Self {
        debug!(?default_timeout, %diagnostics_channel, "MessageBus::new: called");
        Self {
            state: Rc::new(RefCell::new(BusState::default())),
            default_timeout,
            diagnostics_channel: Rc::from(diagnostics_channel),
        }
    }

    /// Channel that carries [`SubscriberError`] payloads
    pub fn diagnostics_channel(&self) -> &str {
        &self.diagnostics_channel
    }

    /// Configure (or reconfigure) the replay buffer of `channel`
    ///
    /// A replay of 0 turns replay off and discards the backlog.
    pub fn create_channel(&self, channel: &str, options: ChannelOptions) {
        debug!(%channel, replay = options.replay, ttl_ms = ?options.ttl_ms, "MessageBus::create_channel: called");
        let mut state = self.state.borrow_mut();
        let ch = state.channels.entry(channel.to_string()).or_default();
        if options.replay == 0 {
            ch.replay = None;
            return;
        }
        match ch.replay.as_mut() {
            Some(buffer) => buffer.reconfigure(&options),
            None => ch.replay = Some(ReplayBuffer::new(&options)),
        }
    }

    /// Subscribe to `channel`, or to every channel with a prefix when it ends in `*`
    ///
    /// On a replay channel the backlog is delivered to this callback, oldest
    /// first, before this call returns. Wildcard subscriptions get no backlog.
    pub fn subscribe(&self, channel: &str, callback: impl Fn(&Message) + 'static) -> Subscription {
        debug!(%channel, "MessageBus::subscribe: called");
        self.add_subscriber(channel, Rc::new(callback), false)
    }

    /// Subscribe for exactly one delivery
    ///
    /// Disposing the returned handle before delivery cancels it.
    pub fn once(&self, channel: &str, callback: impl Fn(&Message) + 'static) -> Subscription {
        debug!(%channel, "MessageBus::once: called");
        self.add_subscriber(channel, Rc::new(callback), true)
    }

    /// Publish `payload` with no sender
    pub fn publish(&self, channel: &str, payload: Value) {
        self.publish_with(channel, payload, PublishMeta::default());
    }

    /// Publish `payload` with caller-supplied metadata
    ///
    /// Exact-name subscribers are served first, then wildcard subscribers,
    /// each group in subscription order. A failing callback is reported on the
    /// diagnostics channel and never stops the fan-out.
    pub fn publish_with(&self, channel: &str, payload: Value, meta: PublishMeta) {
        debug!(%channel, sender = ?meta.sender, "MessageBus::publish: called");
        let message = Message {
            channel: channel.to_string(),
            payload,
            meta: meta.stamp(),
        };

        {
            let mut state = self.state.borrow_mut();
            state.published += 1;
            state.queue.push_back(message);
            if state.delivering {
                debug!(%channel, "MessageBus::publish: queued behind in-progress delivery");
                return;
            }
            state.delivering = true;
        }
        self.drain();
    }

    /// Deliver queued messages until the queue is empty, then leave delivering mode
    fn drain(&self) {
        loop {
            let next = self.state.borrow_mut().queue.pop_front();
            let Some(message) = next else {
                break;
            };
            self.deliver(message);
        }
        self.state.borrow_mut().delivering = false;
    }

    /// Wait for the next message on `channel`
    ///
    /// Sugar over [`once`](Self::once) raced against a deadline (default from
    /// config when `None`). The subscription is made immediately and removed
    /// on every outcome, including dropping the future.
    pub fn wait_for(&self, channel: &str, timeout: Option<Duration>) -> LocalBoxFuture<'static, BridgeResult<Message>> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        debug!(%channel, ?timeout, "MessageBus::wait_for: called");

        let (tx, rx) = oneshot::channel();
        let tx = RefCell::new(Some(tx));
        let subscription = self.once(channel, move |message| {
            // A message arriving after the deadline closes the sender instead
            let tx = tx.borrow_mut().take();
            if let Some(tx) = tx.filter(|_| Instant::now() < deadline) {
                let _ = tx.send(message.clone());
            }
        });
        let guard = DisposeOnDrop(subscription);
        let state = Rc::downgrade(&self.state);
        let channel = channel.to_string();

        Box::pin(async move {
            let result = tokio::time::timeout_at(deadline, rx).await;
            drop(guard);
            match result {
                Ok(Ok(message)) => Ok(message),
                Ok(Err(_)) if Instant::now() < deadline => Err(BridgeError::Cancelled {
                    what: format!("a message on '{}'", channel),
                }),
                _ => {
                    warn!(%channel, ?timeout, "Wait for message timed out");
                    if let Some(state) = state.upgrade() {
                        state.borrow_mut().timeouts += 1;
                    }
                    Err(BridgeError::MessageTimeout { channel, timeout })
                }
            }
        })
    }

    /// Record a failed callback and surface it on the diagnostics channel
    ///
    /// Failures of callbacks attached to the diagnostics channel itself are
    /// only logged.
    pub(crate) fn report(&self, error: SubscriberError) {
        warn!(target = %error.target, kind = %error.kind, message = %error.message, "Callback failed");
        self.state.borrow_mut().subscriber_errors += 1;
        if error.target == *self.diagnostics_channel {
            return;
        }
        let payload = json!({
            "target": error.target,
            "kind": error.kind,
            "message": error.message,
        });
        let channel = self.diagnostics_channel.clone();
        self.publish_with(&channel, payload, PublishMeta::from_sender("bridge"));
    }

    /// Channel names that have subscribers or replay configured, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of exact-name subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .borrow()
            .channels
            .get(channel)
            .map(|ch| ch.subscribers.len())
            .unwrap_or(0)
    }

    /// Number of buffered messages on `channel`, expired ones included
    pub fn backlog_len(&self, channel: &str) -> usize {
        self.state
            .borrow()
            .channels
            .get(channel)
            .and_then(|ch| ch.replay.as_ref())
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> BusMetrics {
        let state = self.state.borrow();
        BusMetrics {
            channels: state.channels.len(),
            subscriptions: state.channels.values().map(|ch| ch.subscribers.len()).sum::<usize>() + state.patterns.len(),
            published: state.published,
            deliveries: state.deliveries,
            subscriber_errors: state.subscriber_errors,
            timeouts: state.timeouts,
        }
    }

    fn add_subscriber(&self, channel: &str, callback: Callback, once: bool) -> Subscription {
        let id = self.state.borrow_mut().next_id();

        if let Some(prefix) = channel.strip_suffix(WILDCARD) {
            let subscription = self.subscription_for(channel, Group::Pattern, id);
            self.state.borrow_mut().patterns.push(PatternSubscriber {
                prefix: prefix.to_string(),
                subscriber: Subscriber {
                    id,
                    callback,
                    once: once.then(|| subscription.clone()),
                },
            });
            return subscription;
        }

        let subscription = self.subscription_for(channel, Group::Exact, id);
        let (backlog, was_delivering) = {
            let mut state = self.state.borrow_mut();
            // Publishes made by the replayed callback queue behind the backlog
            let was_delivering = std::mem::replace(&mut state.delivering, true);
            let ch = state.channels.entry(channel.to_string()).or_default();
            let backlog = ch.replay.as_mut().map(|r| r.backlog()).unwrap_or_default();
            // A once-subscriber satisfied by the backlog never joins the list
            if !(once && !backlog.is_empty()) {
                ch.subscribers.push(Subscriber {
                    id,
                    callback: callback.clone(),
                    once: once.then(|| subscription.clone()),
                });
            }
            (backlog, was_delivering)
        };

        if !backlog.is_empty() {
            debug!(%channel, count = backlog.len(), once, "MessageBus::subscribe: replaying backlog");
        }
        let replayed = if once { backlog.into_iter().take(1).collect() } else { backlog };
        for message in replayed {
            self.invoke(&callback, &message);
        }
        if !was_delivering {
            self.drain();
        }
        if once && !self.is_subscribed(channel, id) {
            subscription.dispose();
        }
        subscription
    }

    fn is_subscribed(&self, channel: &str, id: u64) -> bool {
        self.state
            .borrow()
            .channels
            .get(channel)
            .is_some_and(|ch| ch.subscribers.iter().any(|s| s.id == id))
    }

    fn subscription_for(&self, channel: &str, group: Group, id: u64) -> Subscription {
        let state = Rc::downgrade(&self.state);
        let channel = channel.to_string();
        Subscription::new(move || {
            let Some(state) = state.upgrade() else {
                return;
            };
            debug!(%channel, id, "MessageBus: unsubscribed");
            let mut state = state.borrow_mut();
            match group {
                Group::Exact => {
                    if let Some(ch) = state.channels.get_mut(&channel) {
                        ch.subscribers.retain(|s| s.id != id);
                        // Response channels and other one-off names don't accumulate
                        if ch.subscribers.is_empty() && ch.replay.is_none() {
                            state.channels.remove(&channel);
                        }
                    }
                }
                Group::Pattern => state.patterns.retain(|p| p.subscriber.id != id),
            }
        })
    }

    fn deliver(&self, message: Message) {
        let targets: Vec<(Group, u64, Callback)> = {
            let mut state = self.state.borrow_mut();
            let mut targets = Vec::new();
            if let Some(ch) = state.channels.get_mut(&message.channel) {
                if let Some(replay) = ch.replay.as_mut() {
                    replay.push(message.clone());
                }
                targets.extend(
                    ch.subscribers
                        .iter()
                        .map(|s| (Group::Exact, s.id, s.callback.clone())),
                );
            }
            targets.extend(
                state
                    .patterns
                    .iter()
                    .filter(|p| message.channel.starts_with(&p.prefix))
                    .map(|p| (Group::Pattern, p.subscriber.id, p.subscriber.callback.clone())),
            );
            targets
        };

        debug!(channel = %message.channel, targets = targets.len(), "MessageBus::deliver: fan-out");
        for (group, id, callback) in targets {
            // An earlier callback may have unsubscribed this one
            let claimed = self.state.borrow_mut().claim(&message.channel, group, id);
            let Some(spent) = claimed else {
                continue;
            };
            if let Some(handle) = spent {
                handle.dispose();
            }
            self.invoke(&callback, &message);
        }
    }

    fn invoke(&self, callback: &Callback, message: &Message) {
        self.state.borrow_mut().deliveries += 1;
        if let Err(error) = invoke_isolated(&message.channel, CallbackKind::Subscriber, || callback(message)) {
            self.report(error);
        }
    }
}
