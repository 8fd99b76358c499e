//! Reactive store implementation

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::batch::{BatchCoordinator, Touched};
use super::path::{PATH_DELIMITER, StorePath};
use super::tree::{self, Mapping};
use crate::diagnostics::{DiagnosticSink, invoke_isolated};
use crate::error::{BridgeError, BridgeResult, CallbackKind, SubscriberError};
use crate::subscription::Subscription;

/// A net change observed by one watcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    /// The watcher's own path
    pub path: String,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
    /// Path that was written to cause the change
    pub trigger: String,
}

type WatchCallback = Rc<dyn Fn(&Change)>;

struct WatcherEntry {
    id: u64,
    callback: WatchCallback,
}

struct WatchedPath {
    path: StorePath,
    entries: Vec<WatcherEntry>,
}

/// Store counters for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreMetrics {
    pub watchers: usize,
    pub watched_paths: usize,
    pub writes: u64,
    pub notifications: u64,
    pub watcher_errors: u64,
    pub batches: u64,
}

#[derive(Default)]
struct StoreState {
    root: Mapping,
    /// Keyed by raw path so descendants of a path form one contiguous range
    watchers: BTreeMap<String, WatchedPath>,
    next_id: u64,
    /// Changes waiting for the in-progress notification pass to finish
    queue: VecDeque<Change>,
    dispatching: bool,
    sink: Option<DiagnosticSink>,
    writes: u64,
    notifications: u64,
    watcher_errors: u64,
}

impl StoreState {
    /// Watched paths equal to, above, or below `path`, with their current values
    fn affected(&self, path: &StorePath) -> Vec<(String, Option<Value>)> {
        let mut affected: Vec<(String, Option<Value>)> = path
            .ancestors_and_self()
            .filter_map(|prefix| self.watchers.get(prefix))
            .map(|w| (w.path.to_string(), tree::lookup(&self.root, w.path.segments()).cloned()))
            .collect();

        let lower = format!("{}{}", path, PATH_DELIMITER);
        let upper = format!("{}{}", path, char::from(PATH_DELIMITER as u8 + 1));
        affected.extend(
            self.watchers
                .range::<str, _>((Bound::Included(lower.as_str()), Bound::Excluded(upper.as_str())))
                .map(|(key, w)| (key.clone(), tree::lookup(&self.root, w.path.segments()).cloned())),
        );
        affected
    }

    fn current(&self, watcher_path: &str) -> Option<Option<Value>> {
        let watched = self.watchers.get(watcher_path)?;
        Some(tree::lookup(&self.root, watched.path.segments()).cloned())
    }
}

/// Path-addressed value tree with per-path watchers
///
/// Writes apply immediately. Outside a batch, each affected watcher is
/// notified once per write whose net effect on its path is a change.
/// Inside [`batch`](Store::batch), notification waits until the outermost
/// batch closes and collapses to one change per watcher.
#[derive(Clone)]
pub struct Store {
    state: Rc<RefCell<StoreState>>,
    batch: Rc<BatchCoordinator>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        debug!("Store::new: called");
        Self {
            state: Rc::new(RefCell::new(StoreState::default())),
            batch: Rc::new(BatchCoordinator::new()),
        }
    }

    /// Value at `path`, or `None` when any segment is missing
    pub fn get(&self, path: &str) -> BridgeResult<Option<Value>> {
        let path = StorePath::parse(path)?;
        Ok(tree::lookup(&self.state.borrow().root, path.segments()).cloned())
    }

    pub fn get_or(&self, path: &str, default: Value) -> BridgeResult<Value> {
        Ok(self.get(path)?.unwrap_or(default))
    }

    /// Deserialize the value at `path` into `T`
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> BridgeResult<Option<T>> {
        match self.get(path)? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BridgeError::ValueType {
                    path: path.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn has(&self, path: &str) -> BridgeResult<bool> {
        let path = StorePath::parse(path)?;
        Ok(tree::lookup(&self.state.borrow().root, path.segments()).is_some())
    }

    /// Write `value` at `path`, creating missing intermediate mappings
    pub fn set(&self, path: &str, value: Value) -> BridgeResult<()> {
        let path = StorePath::parse(path)?;
        debug!(%path, "Store::set: called");
        self.mutate(&path, |root| {
            tree::insert(root, path.parent_segments(), path.leaf(), value);
        });
        Ok(())
    }

    /// Remove the value at `path`, returning it
    ///
    /// Watchers see `new_value: None`.
    pub fn delete(&self, path: &str) -> BridgeResult<Option<Value>> {
        let path = StorePath::parse(path)?;
        debug!(%path, "Store::delete: called");
        Ok(self.mutate(&path, |root| tree::remove(root, path.parent_segments(), path.leaf())))
    }

    /// Compute the new value at `path` from the current one and write it
    pub fn update(&self, path: &str, f: impl FnOnce(Option<Value>) -> Value) -> BridgeResult<Value> {
        let current = self.get(path)?;
        let next = f(current);
        self.set(path, next.clone())?;
        Ok(next)
    }

    /// Shallow-merge the keys of `partial` into the mapping at `path`
    ///
    /// The target becomes a mapping if it is absent or holds a non-mapping.
    /// All keys land in one write, so each watcher sees at most one change.
    pub fn merge(&self, path: &str, partial: Value) -> BridgeResult<()> {
        let path = StorePath::parse(path)?;
        let Value::Object(partial) = partial else {
            return Err(BridgeError::NotAMapping { path: path.to_string() });
        };
        debug!(%path, keys = partial.len(), "Store::merge: called");
        self.mutate(&path, |root| {
            let parent = tree::materialize(root, path.parent_segments());
            let slot = parent
                .entry(path.leaf().to_string())
                .or_insert_with(|| Value::Object(Mapping::new()));
            tree::ensure_mapping(slot).extend(partial);
        });
        Ok(())
    }

    /// Call `callback` when the value at `path`, or anything under it, changes
    pub fn watch(&self, path: &str, callback: impl Fn(&Change) + 'static) -> BridgeResult<Subscription> {
        let path = StorePath::parse(path)?;
        debug!(%path, "Store::watch: called");
        let id = {
            let mut state = self.state.borrow_mut();
            state.next_id += 1;
            let id = state.next_id;
            state
                .watchers
                .entry(path.to_string())
                .or_insert_with(|| WatchedPath {
                    path: path.clone(),
                    entries: Vec::new(),
                })
                .entries
                .push(WatcherEntry {
                    id,
                    callback: Rc::new(callback),
                });
            id
        };

        let state = Rc::downgrade(&self.state);
        let key = path.to_string();
        Ok(Subscription::new(move || {
            let Some(state) = state.upgrade() else {
                return;
            };
            debug!(path = %key, id, "Store: unwatched");
            let mut state = state.borrow_mut();
            if let Some(watched) = state.watchers.get_mut(&key) {
                watched.entries.retain(|e| e.id != id);
                if watched.entries.is_empty() {
                    state.watchers.remove(&key);
                }
            }
        }))
    }

    /// Run `f` with notifications deferred until it returns
    ///
    /// Writes inside `f` are visible to `get` immediately. When the outermost
    /// batch closes, each touched watcher gets one change carrying the value
    /// from before its first write and the value at close. A panic in `f`
    /// still flushes: writes already applied stay applied and notify, then the
    /// panic resumes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.batch.open();
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        if let Some(touched) = self.batch.close() {
            self.flush(touched);
        }
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn in_batch(&self) -> bool {
        self.batch.is_open()
    }

    /// Deep copy of the whole tree
    pub fn snapshot(&self) -> Value {
        Value::Object(self.state.borrow().root.clone())
    }

    /// Number of watchers registered exactly at `path`
    pub fn watcher_count(&self, path: &str) -> usize {
        self.state
            .borrow()
            .watchers
            .get(path)
            .map(|w| w.entries.len())
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> StoreMetrics {
        let state = self.state.borrow();
        StoreMetrics {
            watchers: state.watchers.values().map(|w| w.entries.len()).sum(),
            watched_paths: state.watchers.len(),
            writes: state.writes,
            notifications: state.notifications,
            watcher_errors: state.watcher_errors,
            batches: self.batch.completed(),
        }
    }

    /// Route callback failures somewhere other than the log
    pub(crate) fn set_diagnostics(&self, sink: DiagnosticSink) {
        self.state.borrow_mut().sink = Some(sink);
    }

    pub(crate) fn report(&self, error: SubscriberError) {
        let sink = {
            let mut state = self.state.borrow_mut();
            state.watcher_errors += 1;
            state.sink.clone()
        };
        match sink {
            Some(sink) => sink(error),
            None => warn!(target = %error.target, kind = %error.kind, message = %error.message, "Callback failed"),
        }
    }

    fn mutate<R>(&self, path: &StorePath, apply: impl FnOnce(&mut Mapping) -> R) -> R {
        let (result, changes) = {
            let mut state = self.state.borrow_mut();
            state.writes += 1;
            let before = state.affected(path);
            let result = apply(&mut state.root);

            if self.batch.is_open() {
                for (watcher_path, old_value) in before {
                    self.batch.touch(&watcher_path, old_value, path.as_str());
                }
                return result;
            }

            let changes: Vec<Change> = before
                .into_iter()
                .filter_map(|(watcher_path, old_value)| {
                    let new_value = state.current(&watcher_path).flatten();
                    (new_value != old_value).then(|| Change {
                        path: watcher_path,
                        new_value,
                        old_value,
                        trigger: path.to_string(),
                    })
                })
                .collect();
            (result, changes)
        };
        self.notify(changes);
        result
    }

    fn flush(&self, touched: Vec<Touched>) {
        let changes: Vec<Change> = {
            let state = self.state.borrow();
            touched
                .into_iter()
                .filter_map(|t| {
                    // Watchers removed during the batch are skipped
                    let new_value = state.current(&t.watcher_path)?;
                    (new_value != t.old_value).then(|| Change {
                        path: t.watcher_path,
                        new_value,
                        old_value: t.old_value,
                        trigger: t.trigger,
                    })
                })
                .collect()
        };
        debug!(changes = changes.len(), "Store::flush: batch closed");
        self.notify(changes);
    }

    fn notify(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        {
            let mut state = self.state.borrow_mut();
            state.queue.extend(changes);
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }

        loop {
            let next = self.state.borrow_mut().queue.pop_front();
            let Some(change) = next else {
                break;
            };
            self.dispatch(&change);
        }
        self.state.borrow_mut().dispatching = false;
    }

    fn dispatch(&self, change: &Change) {
        let targets: Vec<(u64, WatchCallback)> = self
            .state
            .borrow()
            .watchers
            .get(&change.path)
            .map(|w| w.entries.iter().map(|e| (e.id, e.callback.clone())).collect())
            .unwrap_or_default();

        for (id, callback) in targets {
            // An earlier watcher may have unwatched this one
            if !self.is_watching(&change.path, id) {
                continue;
            }
            self.state.borrow_mut().notifications += 1;
            if let Err(error) = invoke_isolated(&change.path, CallbackKind::Watcher, || callback(change)) {
                self.report(error);
            }
        }
    }

    fn is_watching(&self, path: &str, id: u64) -> bool {
        self.state
            .borrow()
            .watchers
            .get(path)
            .is_some_and(|w| w.entries.iter().any(|e| e.id == id))
    }
}
