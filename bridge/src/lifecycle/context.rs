//! Per-module view of the Bridge

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::bridge::Bridge;
use crate::bus::{Message, PublishMeta};
use crate::config::ChannelOptions;
use crate::error::BridgeResult;
use crate::store::{Change, Selector};
use crate::subscription::Subscription;

/// The handle a module receives in `start` and `stop`
///
/// Exposes the Bridge operations, stamps the module id as sender on
/// everything it publishes, and keeps a ledger of every disposal handle it
/// hands out.
#[derive(Clone)]
pub struct ModuleContext {
    bridge: Bridge,
    module_id: Rc<str>,
    ledger: Rc<RefCell<Vec<Subscription>>>,
    /// Latest provide handle per name, so `unprovide` settles the ledger entry
    provided: Rc<RefCell<HashMap<String, Subscription>>>,
}

impl ModuleContext {
    pub(crate) fn new(bridge: Bridge, module_id: &str) -> Self {
        debug!(%module_id, "ModuleContext::new: called");
        Self {
            bridge,
            module_id: Rc::from(module_id),
            ledger: Rc::new(RefCell::new(Vec::new())),
            provided: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The underlying Bridge. Handles issued through it directly are not tracked.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Record a handle obtained elsewhere so teardown covers it
    pub fn adopt(&self, subscription: Subscription) -> Subscription {
        self.ledger.borrow_mut().push(subscription.clone());
        subscription
    }

    /// Handles issued so far
    pub fn issued(&self) -> usize {
        self.ledger.borrow().len()
    }

    /// Issued handles not yet disposed
    pub fn active(&self) -> usize {
        self.ledger.borrow().iter().filter(|s| s.is_active()).count()
    }

    /// Dispose every handle still active, newest first; returns how many there were
    pub(crate) fn dispose_all(&self) -> usize {
        let ledger: Vec<Subscription> = self.ledger.borrow().clone();
        let mut disposed = 0;
        for subscription in ledger.iter().rev() {
            if subscription.is_active() {
                subscription.dispose();
                disposed += 1;
            }
        }
        disposed
    }

    fn meta(&self) -> PublishMeta {
        PublishMeta::from_sender(self.module_id.as_ref())
    }

    /// Run `future` on the local task set; disposing the handle aborts it
    ///
    /// Must be called from inside a `tokio::task::LocalSet`.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) -> Subscription {
        debug!(module_id = %self.module_id, "ModuleContext::spawn: called");
        let task = tokio::task::spawn_local(future);
        self.adopt(Subscription::new(move || task.abort()))
    }

    // Service registry

    pub fn provide<T: Any>(&self, name: &str, service: Rc<T>) -> Subscription {
        let subscription = self.adopt(self.bridge.provide(name, service));
        self.provided
            .borrow_mut()
            .insert(name.to_string(), subscription.clone());
        subscription
    }

    /// Remove `name` and mark this module's provide handle for it as disposed
    pub fn unprovide(&self, name: &str) -> bool {
        let removed = self.bridge.unprovide(name);
        let own = self.provided.borrow_mut().remove(name);
        if let Some(subscription) = own {
            debug!(module_id = %self.module_id, %name, "ModuleContext::unprovide: settled provide handle");
            subscription.dispose();
        }
        removed
    }

    pub fn try_use<T: Any>(&self, name: &str) -> Option<Rc<T>> {
        self.bridge.try_use(name)
    }

    pub fn use_service<T: Any>(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> LocalBoxFuture<'static, BridgeResult<Rc<T>>> {
        self.bridge.use_service(name, timeout)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.bridge.has_service(name)
    }

    // Message bus

    pub fn create_channel(&self, channel: &str, options: ChannelOptions) {
        self.bridge.create_channel(channel, options)
    }

    pub fn subscribe(&self, channel: &str, callback: impl Fn(&Message) + 'static) -> Subscription {
        self.adopt(self.bridge.subscribe(channel, callback))
    }

    pub fn once(&self, channel: &str, callback: impl Fn(&Message) + 'static) -> Subscription {
        self.adopt(self.bridge.once(channel, callback))
    }

    /// Publish with this module as sender
    pub fn publish(&self, channel: &str, payload: Value) {
        self.bridge.publish_with(channel, payload, self.meta())
    }

    pub fn wait_for(&self, channel: &str, timeout: Option<Duration>) -> LocalBoxFuture<'static, BridgeResult<Message>> {
        self.bridge.wait_for(channel, timeout)
    }

    pub fn request(
        &self,
        channel: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> LocalBoxFuture<'static, BridgeResult<Message>> {
        self.bridge.bus().request(channel, payload, self.meta(), timeout)
    }

    pub fn reply(&self, request: &Message, payload: Value) -> bool {
        self.bridge.bus().reply(request, payload, self.meta())
    }

    // Reactive store

    pub fn get(&self, path: &str) -> BridgeResult<Option<Value>> {
        self.bridge.get(path)
    }

    pub fn get_or(&self, path: &str, default: Value) -> BridgeResult<Value> {
        self.bridge.get_or(path, default)
    }

    pub fn has(&self, path: &str) -> BridgeResult<bool> {
        self.bridge.has(path)
    }

    pub fn set(&self, path: &str, value: Value) -> BridgeResult<()> {
        self.bridge.set(path, value)
    }

    pub fn delete(&self, path: &str) -> BridgeResult<Option<Value>> {
        self.bridge.delete(path)
    }

    pub fn update(&self, path: &str, f: impl FnOnce(Option<Value>) -> Value) -> BridgeResult<Value> {
        self.bridge.update(path, f)
    }

    pub fn merge(&self, path: &str, partial: Value) -> BridgeResult<()> {
        self.bridge.merge(path, partial)
    }

    pub fn watch(&self, path: &str, callback: impl Fn(&Change) + 'static) -> BridgeResult<Subscription> {
        Ok(self.adopt(self.bridge.watch(path, callback)?))
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bridge.batch(f)
    }

    pub fn selector(&self, path: &str, default: Option<Value>) -> BridgeResult<Selector> {
        self.bridge.selector(path, default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_stamps_sender() {
        let bridge = Bridge::default();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let _sub = bridge.subscribe("chat", move |m| *sink.borrow_mut() = m.meta.sender.clone());

        bridge.scope("chat-panel").publish("chat", json!("hi"));
        assert_eq!(seen.borrow().as_deref(), Some("chat-panel"));
    }

    #[test]
    fn test_ledger_counts() {
        let ctx = Bridge::default().scope("hud");
        let sub = ctx.subscribe("chat", |_| {});
        let _watch = ctx.watch("hud.visible", |_| {}).unwrap();
        let _svc = ctx.provide("hud", Rc::new(()));
        assert_eq!(ctx.issued(), 3);
        assert_eq!(ctx.active(), 3);

        sub.dispose();
        assert_eq!(ctx.active(), 2);
        assert_eq!(ctx.dispose_all(), 2);
        assert_eq!(ctx.active(), 0);
        assert!(!ctx.has_service("hud"));
    }

    #[test]
    fn test_unprovide_settles_ledger() {
        let ctx = Bridge::default().scope("audio");
        let first = ctx.provide("audio", Rc::new(1u8));
        let second = ctx.provide("audio", Rc::new(2u8));
        assert_eq!(ctx.active(), 2);

        assert!(ctx.unprovide("audio"));
        assert!(!ctx.has_service("audio"));
        assert!(!second.is_active());
        // The earlier handle was replaced, not unprovided
        assert!(first.is_active());

        first.dispose();
        assert_eq!(ctx.active(), 0);
        assert!(!ctx.unprovide("audio"));
    }

    #[test]
    fn test_unprovide_of_foreign_name_leaves_ledger() {
        let bridge = Bridge::default();
        let _other = bridge.provide("chat", Rc::new(()));
        let ctx = bridge.scope("audio");
        let own = ctx.provide("audio", Rc::new(()));

        assert!(ctx.unprovide("chat"));
        assert!(own.is_active());
        assert_eq!(ctx.active(), 1);
    }

    #[test]
    fn test_invalid_watch_is_not_recorded() {
        let ctx = Bridge::default().scope("hud");
        assert!(ctx.watch("hud..visible", |_| {}).is_err());
        assert_eq!(ctx.issued(), 0);
    }

    #[tokio::test]
    async fn test_spawned_task_aborted_on_dispose() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ctx = Bridge::default().scope("audio");
                let finished = Rc::new(RefCell::new(false));
                let flag = finished.clone();
                let task = ctx.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    *flag.borrow_mut() = true;
                });
                task.dispose();
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(!*finished.borrow());
            })
            .await;
    }
}
