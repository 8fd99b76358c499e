//! The Bridge façade
//!
//! Aggregates the service registry, message bus and reactive store. This is
//! the only handle modules receive; everything it exposes is a thin delegate.

use std::any::Any;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::bus::{BusMetrics, Message, MessageBus, PublishMeta};
use crate::config::{BridgeConfig, ChannelOptions};
use crate::error::BridgeResult;
use crate::lifecycle::ModuleContext;
use crate::registry::{RegistryMetrics, ServiceHandle, ServiceRegistry};
use crate::store::{Change, Selector, Store, StoreMetrics};
use crate::subscription::Subscription;

/// Snapshot of every counter in the runtime
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeMetrics {
    pub services: RegistryMetrics,
    pub bus: BusMetrics,
    pub store: StoreMetrics,
}

/// Shared runtime handed to every module
///
/// Single-threaded: clones share state and the type is `!Send`. Hosts that
/// run modules on several threads go through [`Dispatcher`](crate::Dispatcher).
#[derive(Clone)]
pub struct Bridge {
    services: ServiceRegistry,
    bus: MessageBus,
    store: Store,
    config: Rc<BridgeConfig>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        debug!(?config, "Bridge::new: called");
        let services = ServiceRegistry::new(config.use_timeout());
        let bus = MessageBus::new(config.wait_timeout(), &config.diagnostics_channel);
        for (channel, options) in &config.channels {
            bus.create_channel(channel, options.clone());
        }

        let store = Store::new();
        let sink = bus.clone();
        store.set_diagnostics(Rc::new(move |error| sink.report(error)));

        info!(
            channels = config.channels.len(),
            diagnostics_channel = %config.diagnostics_channel,
            "Bridge created"
        );
        Self {
            services,
            bus,
            store,
            config: Rc::new(config),
        }
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Per-module view that stamps the module id and records every handle issued
    pub fn scope(&self, module_id: &str) -> ModuleContext {
        ModuleContext::new(self.clone(), module_id)
    }

    pub fn metrics(&self) -> BridgeMetrics {
        BridgeMetrics {
            services: self.services.metrics(),
            bus: self.bus.metrics(),
            store: self.store.metrics(),
        }
    }

    // Service registry

    pub fn provide<T: Any>(&self, name: &str, service: Rc<T>) -> Subscription {
        self.services.provide(name, service)
    }

    pub fn unprovide(&self, name: &str) -> bool {
        self.services.unprovide(name)
    }

    pub fn try_use<T: Any>(&self, name: &str) -> Option<Rc<T>> {
        self.services.try_use(name)
    }

    pub fn try_use_handle(&self, name: &str) -> Option<ServiceHandle> {
        self.services.try_use_handle(name)
    }

    pub fn use_service<T: Any>(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> LocalBoxFuture<'static, BridgeResult<Rc<T>>> {
        self.services.use_service(name, timeout)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.has_service(name)
    }

    // Message bus

    pub fn create_channel(&self, channel: &str, options: ChannelOptions) {
        self.bus.create_channel(channel, options)
    }

    pub fn subscribe(&self, channel: &str, callback: impl Fn(&Message) + 'static) -> Subscription {
        self.bus.subscribe(channel, callback)
    }

    pub fn once(&self, channel: &str, callback: impl Fn(&Message) + 'static) -> Subscription {
        self.bus.once(channel, callback)
    }

    pub fn publish(&self, channel: &str, payload: Value) {
        self.bus.publish(channel, payload)
    }

    pub fn publish_with(&self, channel: &str, payload: Value, meta: PublishMeta) {
        self.bus.publish_with(channel, payload, meta)
    }

    pub fn wait_for(&self, channel: &str, timeout: Option<Duration>) -> LocalBoxFuture<'static, BridgeResult<Message>> {
        self.bus.wait_for(channel, timeout)
    }

    pub fn request(
        &self,
        channel: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> LocalBoxFuture<'static, BridgeResult<Message>> {
        self.bus.request(channel, payload, PublishMeta::default(), timeout)
    }

    pub fn reply(&self, request: &Message, payload: Value) -> bool {
        self.bus.reply(request, payload, PublishMeta::default())
    }

    // Reactive store

    pub fn get(&self, path: &str) -> BridgeResult<Option<Value>> {
        self.store.get(path)
    }

    pub fn get_or(&self, path: &str, default: Value) -> BridgeResult<Value> {
        self.store.get_or(path, default)
    }

    pub fn has(&self, path: &str) -> BridgeResult<bool> {
        self.store.has(path)
    }

    pub fn set(&self, path: &str, value: Value) -> BridgeResult<()> {
        self.store.set(path, value)
    }

    pub fn delete(&self, path: &str) -> BridgeResult<Option<Value>> {
        self.store.delete(path)
    }

    pub fn update(&self, path: &str, f: impl FnOnce(Option<Value>) -> Value) -> BridgeResult<Value> {
        self.store.update(path, f)
    }

    pub fn merge(&self, path: &str, partial: Value) -> BridgeResult<()> {
        self.store.merge(path, partial)
    }

    pub fn watch(&self, path: &str, callback: impl Fn(&Change) + 'static) -> BridgeResult<Subscription> {
        self.store.watch(path, callback)
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.store.batch(f)
    }

    pub fn selector(&self, path: &str, default: Option<Value>) -> BridgeResult<Selector> {
        self.store.selector(path, default)
    }
}
