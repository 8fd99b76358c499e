//! modbridge - in-process bridge for dynamically loaded modules
//!
//! Independently loaded modules find each other at runtime through one
//! shared [`Bridge`] instead of compile-time coupling or a fixed load order.
//!
//! # Core Concepts
//!
//! - **Service Registry**: named objects, resolvable synchronously or by
//!   awaiting a later `provide` with a deadline
//! - **Message Bus**: named broadcast channels with replay, wildcard and
//!   one-shot subscriptions, and request/response over plain channels
//! - **Reactive Store**: one path-addressed value tree with per-path watchers
//!   and batched, coalesced notification
//! - **Disposal handles**: every registration returns a [`Subscription`];
//!   nothing is undone until it is disposed
//!
//! The runtime is single-threaded. Multi-threaded hosts serialize access
//! through a [`Dispatcher`].
//!
//! # Modules
//!
//! - [`registry`] - Service registry
//! - [`bus`] - Message bus
//! - [`store`] - Reactive store, batch coordinator, selectors
//! - [`lifecycle`] - Module trait, per-module context and host
//! - [`dispatch`] - Serialized dispatch thread
//! - [`config`] - Configuration types and loading

pub mod bridge;
pub mod bus;
pub mod cli;
pub mod config;
pub mod demo;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod store;
pub mod subscription;

mod diagnostics;

pub use bridge::{Bridge, BridgeMetrics};
pub use bus::{BusMetrics, Message, MessageBus, MessageMeta, PublishMeta};
pub use config::{BridgeConfig, ChannelOptions, Config};
pub use dispatch::{Dispatcher, DispatcherHandle};
pub use error::{BridgeError, BridgeResult, CallbackKind, SubscriberError};
pub use lifecycle::{BridgeModule, ModuleContext, ModuleHost, UnloadReport};
pub use registry::{RegistryMetrics, ServiceHandle, ServiceRegistry};
pub use store::{Change, ObservableCell, Selector, Store, StoreMetrics, StorePath};
pub use subscription::Subscription;
