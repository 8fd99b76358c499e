//! ServiceRegistry implementation

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::waiter::{Waiter, WaiterGuard};
use crate::error::{BridgeError, BridgeResult};
use crate::subscription::Subscription;

/// Opaque reference to a provided object. The registry never copies it.
pub type ServiceHandle = Rc<dyn Any>;

struct ServiceEntry {
    handle: ServiceHandle,
    /// Bumped on every provide so a stale disposal handle can't remove a replacement
    generation: u64,
}

/// Registry counters for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryMetrics {
    pub services: usize,
    pub pending_waiters: usize,
    pub provides: u64,
    pub resolved_waiters: u64,
    pub timeouts: u64,
}

#[derive(Default)]
pub(super) struct RegistryState {
    entries: HashMap<String, ServiceEntry>,
    pub(super) waiters: HashMap<String, Vec<Waiter>>,
    next_generation: u64,
    next_waiter: u64,
    provides: u64,
    resolved_waiters: u64,
    timeouts: u64,
}

/// Named object directory with sync and deadline-bounded async lookup
#[derive(Clone)]
pub struct ServiceRegistry {
    state: Rc<RefCell<RegistryState>>,
    default_timeout: Duration,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new(default_timeout: Duration) -> Self {
        debug!(?default_timeout, "ServiceRegistry::new: called");
        Self {
            state: Rc::new(RefCell::new(RegistryState::default())),
            default_timeout,
        }
    }

    /// Register `service` under `name`, replacing any previous handle
    pub fn provide<T: Any>(&self, name: &str, service: Rc<T>) -> Subscription {
        self.provide_handle(name, service)
    }

    /// Register an untyped handle under `name`
    ///
    /// Pending `use_service` callers for `name` are resolved with this handle
    /// in the order they started waiting. Disposing the returned subscription
    /// unprovides the name only if this handle is still the registered one.
    pub fn provide_handle(&self, name: &str, handle: ServiceHandle) -> Subscription {
        debug!(%name, "ServiceRegistry::provide: called");
        let (generation, waiters) = {
            let mut state = self.state.borrow_mut();
            state.next_generation += 1;
            state.provides += 1;
            let generation = state.next_generation;
            let previous = state.entries.insert(
                name.to_string(),
                ServiceEntry {
                    handle: handle.clone(),
                    generation,
                },
            );
            if previous.is_some() {
                debug!(%name, "ServiceRegistry::provide: replaced existing handle");
            }
            (generation, state.waiters.remove(name).unwrap_or_default())
        };

        // Waiters past their deadline are dropped unresolved and report a timeout
        let now = Instant::now();
        let mut resolved = 0;
        for waiter in waiters.into_iter().filter(|w| w.is_live(now)) {
            if waiter.tx.send(handle.clone()).is_ok() {
                resolved += 1;
            }
        }
        if resolved > 0 {
            debug!(%name, resolved, "ServiceRegistry::provide: resolved waiters");
            self.state.borrow_mut().resolved_waiters += resolved;
        }

        let state = Rc::downgrade(&self.state);
        let name = name.to_string();
        Subscription::new(move || {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.borrow_mut();
            if state.entries.get(&name).is_some_and(|e| e.generation == generation) {
                debug!(%name, "ServiceRegistry: disposal handle unprovided service");
                state.entries.remove(&name);
            }
        })
    }

    /// Remove `name`. Handles already given to callers stay valid.
    pub fn unprovide(&self, name: &str) -> bool {
        debug!(%name, "ServiceRegistry::unprovide: called");
        self.state.borrow_mut().entries.remove(name).is_some()
    }

    /// Look up `name` without waiting
    ///
    /// Returns `None` if absent or if the handle is not a `T`.
    pub fn try_use<T: Any>(&self, name: &str) -> Option<Rc<T>> {
        debug!(%name, "ServiceRegistry::try_use: called");
        let handle = self.try_use_handle(name)?;
        match downcast::<T>(name, handle) {
            Ok(service) => Some(service),
            Err(e) => {
                warn!(%name, error = %e, "ServiceRegistry::try_use: type mismatch");
                None
            }
        }
    }

    /// Look up the untyped handle for `name` without waiting
    pub fn try_use_handle(&self, name: &str) -> Option<ServiceHandle> {
        self.state.borrow().entries.get(name).map(|e| e.handle.clone())
    }

    /// Whether `name` is currently provided
    pub fn has_service(&self, name: &str) -> bool {
        self.state.borrow().entries.contains_key(name)
    }

    /// Resolve `name` now if present, otherwise when it is provided
    ///
    /// Fails with [`BridgeError::ServiceTimeout`] if the deadline (default from
    /// config when `None`) passes first. The waiter is registered when this is
    /// called, not when the future is first polled; dropping the future
    /// deregisters it.
    pub fn use_service<T: Any>(&self, name: &str, timeout: Option<Duration>) -> LocalBoxFuture<'static, BridgeResult<Rc<T>>> {
        let pending = self.use_handle(name, timeout);
        let name = name.to_string();
        Box::pin(async move { downcast::<T>(&name, pending.await?) })
    }

    /// Untyped form of [`use_service`](Self::use_service)
    pub fn use_handle(&self, name: &str, timeout: Option<Duration>) -> LocalBoxFuture<'static, BridgeResult<ServiceHandle>> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        debug!(%name, ?timeout, "ServiceRegistry::use_handle: called");

        if let Some(handle) = self.try_use_handle(name) {
            debug!(%name, "ServiceRegistry::use_handle: already provided");
            return Box::pin(async move { Ok(handle) });
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.borrow_mut();
            state.next_waiter += 1;
            let id = state.next_waiter;
            let now = Instant::now();
            let waiters = state.waiters.entry(name.to_string()).or_default();
            waiters.retain(|w| w.is_live(now));
            waiters.push(Waiter { id, tx, deadline });
            id
        };
        let guard = WaiterGuard::new(Rc::downgrade(&self.state), name, id);
        let state = Rc::downgrade(&self.state);
        let name = name.to_string();

        Box::pin(async move {
            let _guard = guard;
            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(handle)) => {
                    debug!(%name, "ServiceRegistry::use_handle: resolved");
                    Ok(handle)
                }
                Ok(Err(_)) if Instant::now() < deadline => Err(BridgeError::Cancelled {
                    what: format!("service '{}'", name),
                }),
                _ => {
                    warn!(%name, ?timeout, "Service lookup timed out");
                    if let Some(state) = state.upgrade() {
                        state.borrow_mut().timeouts += 1;
                    }
                    Err(BridgeError::ServiceTimeout { name, timeout })
                }
            }
        })
    }

    /// Names currently provided, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metrics(&self) -> RegistryMetrics {
        let state = self.state.borrow();
        RegistryMetrics {
            services: state.entries.len(),
            pending_waiters: state.waiters.values().map(|w| w.len()).sum(),
            provides: state.provides,
            resolved_waiters: state.resolved_waiters,
            timeouts: state.timeouts,
        }
    }
}

fn downcast<T: Any>(name: &str, handle: ServiceHandle) -> BridgeResult<Rc<T>> {
    handle.downcast::<T>().map_err(|_| BridgeError::ServiceType {
        name: name.to_string(),
        expected: type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Audio {
        volume: Cell<u8>,
    }

    fn audio() -> Rc<Audio> {
        Rc::new(Audio { volume: Cell::new(5) })
    }

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Duration::from_millis(200))
    }

    #[test]
    fn test_provide_and_try_use() {
        let registry = registry();
        assert!(!registry.has_service("audio"));
        assert!(registry.try_use::<Audio>("audio").is_none());

        let svc = audio();
        registry.provide("audio", svc.clone());

        assert!(registry.has_service("audio"));
        let found = registry.try_use::<Audio>("audio").unwrap();
        assert!(Rc::ptr_eq(&found, &svc));

        // The registry shares the object rather than copying it
        found.volume.set(9);
        assert_eq!(svc.volume.get(), 9);
    }

    #[test]
    fn test_last_provide_wins() {
        let registry = registry();
        let first = audio();
        let second = audio();
        registry.provide("audio", first);
        registry.provide("audio", second.clone());

        assert!(Rc::ptr_eq(&registry.try_use::<Audio>("audio").unwrap(), &second));
        assert_eq!(registry.metrics().services, 1);
        assert_eq!(registry.metrics().provides, 2);
    }

    #[test]
    fn test_try_use_wrong_type() {
        let registry = registry();
        registry.provide("audio", audio());
        assert!(registry.try_use::<String>("audio").is_none());
        assert!(registry.try_use_handle("audio").is_some());
    }

    #[test]
    fn test_unprovide_keeps_resolved_handles() {
        let registry = registry();
        registry.provide("audio", audio());
        let held = registry.try_use::<Audio>("audio").unwrap();

        assert!(registry.unprovide("audio"));
        assert!(!registry.unprovide("audio"));
        assert!(!registry.has_service("audio"));
        assert_eq!(held.volume.get(), 5);
    }

    #[test]
    fn test_stale_disposal_does_not_remove_replacement() {
        let registry = registry();
        let old = registry.provide("audio", audio());
        let replacement = audio();
        let current = registry.provide("audio", replacement.clone());

        old.dispose();
        assert!(Rc::ptr_eq(&registry.try_use::<Audio>("audio").unwrap(), &replacement));

        current.dispose();
        assert!(!registry.has_service("audio"));
    }

    #[test]
    fn test_names_sorted() {
        let registry = registry();
        registry.provide("b", audio());
        registry.provide("a", audio());
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_use_service_immediate() {
        let registry = registry();
        let svc = audio();
        registry.provide("audio", svc.clone());

        let found = registry.use_service::<Audio>("audio", None).await.unwrap();
        assert!(Rc::ptr_eq(&found, &svc));
        assert_eq!(registry.metrics().pending_waiters, 0);
    }

    #[tokio::test]
    async fn test_use_service_waits_for_provide() {
        let registry = registry();
        let svc = audio();

        let pending = registry.use_service::<Audio>("audio", Some(Duration::from_secs(2)));
        assert_eq!(registry.metrics().pending_waiters, 1);

        let provider = registry.clone();
        let provided = svc.clone();
        let (found, _) = tokio::join!(pending, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            provider.provide("audio", provided);
        });

        assert!(Rc::ptr_eq(&found.unwrap(), &svc));
        assert_eq!(registry.metrics().pending_waiters, 0);
        assert_eq!(registry.metrics().resolved_waiters, 1);
    }

    #[tokio::test]
    async fn test_use_service_timeout() {
        let registry = registry();
        let start = tokio::time::Instant::now();

        let err = registry
            .use_service::<Audio>("audio", Some(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(registry.metrics().pending_waiters, 0);
        assert_eq!(registry.metrics().timeouts, 1);
    }

    #[tokio::test]
    async fn test_use_service_deadline_starts_at_call() {
        let registry = registry();
        let pending = registry.use_service::<Audio>("audio", Some(Duration::from_millis(50)));
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Provided after the deadline, before the future was ever polled
        registry.provide("audio", audio());
        assert_eq!(registry.metrics().resolved_waiters, 0);

        let started = std::time::Instant::now();
        let err = pending.await.unwrap_err();
        assert!(matches!(err, BridgeError::ServiceTimeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(40));
        assert_eq!(registry.metrics().timeouts, 1);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_pruned() {
        let registry = registry();
        let (tx, rx) = oneshot::channel();
        drop(rx);
        registry.state.borrow_mut().waiters.entry("audio".to_string()).or_default().push(Waiter {
            id: 999,
            tx,
            deadline: Instant::now() + Duration::from_secs(10),
        });

        let _pending = registry.use_handle("audio", None);
        assert_eq!(registry.metrics().pending_waiters, 1);
    }

    #[tokio::test]
    async fn test_use_service_default_timeout() {
        let registry = ServiceRegistry::new(Duration::from_millis(30));
        let err = registry.use_handle("missing", None).await.unwrap_err();
        match err {
            BridgeError::ServiceTimeout { name, timeout } => {
                assert_eq!(name, "missing");
                assert_eq!(timeout, Duration::from_millis(30));
            }
            other => panic!("Expected ServiceTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_use_service_wrong_type() {
        let registry = registry();
        registry.provide("audio", audio());
        let err = registry.use_service::<String>("audio", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::ServiceType { .. }));
    }

    #[tokio::test]
    async fn test_dropped_future_deregisters_waiter() {
        let registry = registry();
        let pending = registry.use_handle("audio", Some(Duration::from_secs(10)));
        assert_eq!(registry.metrics().pending_waiters, 1);

        drop(pending);
        assert_eq!(registry.metrics().pending_waiters, 0);

        // A later provide has nobody to resolve
        registry.provide("audio", audio());
        assert_eq!(registry.metrics().resolved_waiters, 0);
    }

    #[tokio::test]
    async fn test_multiple_waiters_resolve_to_same_handle() {
        let registry = registry();
        let first = registry.use_service::<Audio>("audio", None);
        let second = registry.use_service::<Audio>("audio", None);
        assert_eq!(registry.metrics().pending_waiters, 2);

        let svc = audio();
        registry.provide("audio", svc.clone());

        let (a, b) = tokio::join!(first, second);
        assert!(Rc::ptr_eq(&a.unwrap(), &svc));
        assert!(Rc::ptr_eq(&b.unwrap(), &svc));
        assert_eq!(registry.metrics().resolved_waiters, 2);
    }
}
