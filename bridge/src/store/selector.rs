//! Pull-based read accessors for presentation layers

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::debug;

use super::path::StorePath;
use super::reactive::Store;
use crate::diagnostics::invoke_isolated;
use crate::error::CallbackKind;
use crate::subscription::Subscription;

/// Minimal reactive cell a UI framework can adapt
///
/// `read` pulls the current value. `subscribe` registers interest and returns
/// the handle the framework disposes from its own cleanup hook.
pub trait ObservableCell {
    fn read(&self) -> Option<Value>;

    fn subscribe(&self, listener: Box<dyn Fn(Option<&Value>)>) -> Subscription;
}

type Listener = Rc<dyn Fn(Option<&Value>)>;

struct SelectorInner {
    store: Store,
    path: StorePath,
    default: Option<Value>,
    listeners: RefCell<Vec<(u64, Listener)>>,
    watch: RefCell<Option<Subscription>>,
    next_id: Cell<u64>,
}

impl SelectorInner {
    fn read(&self) -> Option<Value> {
        self.store
            .get(self.path.as_str())
            .ok()
            .flatten()
            .or_else(|| self.default.clone())
    }

    fn unwatch(&self) {
        let watch = self.watch.borrow_mut().take();
        if let Some(watch) = watch {
            debug!(path = %self.path, "Selector: released store watch");
            watch.dispose();
        }
    }

    fn notify(&self, value: Option<&Value>) {
        let listeners: Vec<(u64, Listener)> = self.listeners.borrow().clone();
        for (id, listener) in listeners {
            if !self.listeners.borrow().iter().any(|(l, _)| *l == id) {
                continue;
            }
            if let Err(error) = invoke_isolated(self.path.as_str(), CallbackKind::Listener, || listener(value)) {
                self.store.report(error);
            }
        }
    }
}

/// Read-only view of one store path
///
/// Holds no store watch until the first listener subscribes, and drops it
/// when the last listener goes away or the selector is disposed. Clones share
/// listeners.
#[derive(Clone)]
pub struct Selector {
    inner: Rc<SelectorInner>,
}

impl Selector {
    pub(crate) fn new(store: Store, path: StorePath, default: Option<Value>) -> Self {
        Self {
            inner: Rc::new(SelectorInner {
                store,
                path,
                default,
                listeners: RefCell::new(Vec::new()),
                watch: RefCell::new(None),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn path(&self) -> &str {
        self.inner.path.as_str()
    }

    /// Whether a store watch is currently installed
    pub fn is_watching(&self) -> bool {
        self.inner.watch.borrow().is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Drop every listener and release the store watch
    pub fn dispose(&self) {
        debug!(path = %self.inner.path, "Selector::dispose: called");
        self.inner.listeners.borrow_mut().clear();
        self.inner.unwatch();
    }

    fn ensure_watching(&self) {
        if self.is_watching() {
            return;
        }
        let weak: Weak<SelectorInner> = Rc::downgrade(&self.inner);
        let watch = self.inner.store.watch(self.inner.path.as_str(), move |change| {
            if let Some(inner) = weak.upgrade() {
                let value = change.new_value.as_ref().or(inner.default.as_ref());
                inner.notify(value);
            }
        });
        // The path was validated when the selector was built
        if let Ok(watch) = watch {
            debug!(path = %self.inner.path, "Selector: installed store watch");
            *self.inner.watch.borrow_mut() = Some(watch);
        }
    }
}

impl ObservableCell for Selector {
    fn read(&self) -> Option<Value> {
        self.inner.read()
    }

    fn subscribe(&self, listener: Box<dyn Fn(Option<&Value>)>) -> Subscription {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        self.inner.listeners.borrow_mut().push((id, Rc::from(listener)));
        self.ensure_watching();

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let empty = {
                let mut listeners = inner.listeners.borrow_mut();
                listeners.retain(|(l, _)| *l != id);
                listeners.is_empty()
            };
            if empty {
                inner.unwatch();
            }
        })
    }
}

impl Store {
    /// Build a [`Selector`] over `path`, reading `default` when absent
    pub fn selector(&self, path: &str, default: Option<Value>) -> crate::error::BridgeResult<Selector> {
        let path = StorePath::parse(path)?;
        Ok(Selector::new(self.clone(), path, default))
    }
}
