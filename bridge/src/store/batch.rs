//! Batch coordinator
//!
//! Tracks which watched paths a group of writes touched and what each one
//! held before the first write, so the store can emit one net notification
//! per watcher when the outermost batch closes.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

/// A watched path touched inside a batch
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Touched {
    pub watcher_path: String,
    /// Value at the watched path before the first write in the batch
    pub old_value: Option<Value>,
    /// Most recent written path that affected the watcher
    pub trigger: String,
}

#[derive(Debug, Default)]
pub(crate) struct BatchCoordinator {
    depth: Cell<usize>,
    touched: RefCell<Vec<Touched>>,
    index: RefCell<HashMap<String, usize>>,
    completed: Cell<u64>,
}

impl BatchCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self) {
        let depth = self.depth.get() + 1;
        debug!(depth, "BatchCoordinator::open: called");
        self.depth.set(depth);
    }

    /// Close one level. Returns the touched set, in first-touch order, when the outermost batch closes.
    pub(crate) fn close(&self) -> Option<Vec<Touched>> {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth > 0 {
            return None;
        }
        self.completed.set(self.completed.get() + 1);
        self.index.borrow_mut().clear();
        let touched = std::mem::take(&mut *self.touched.borrow_mut());
        debug!(touched = touched.len(), "BatchCoordinator::close: outermost batch closed");
        Some(touched)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.depth.get() > 0
    }

    /// Record a write affecting `watcher_path`. Only the first old value is kept.
    pub(crate) fn touch(&self, watcher_path: &str, old_value: Option<Value>, trigger: &str) {
        let mut index = self.index.borrow_mut();
        let mut touched = self.touched.borrow_mut();
        match index.get(watcher_path) {
            Some(&pos) => touched[pos].trigger = trigger.to_string(),
            None => {
                index.insert(watcher_path.to_string(), touched.len());
                touched.push(Touched {
                    watcher_path: watcher_path.to_string(),
                    old_value,
                    trigger: trigger.to_string(),
                });
            }
        }
    }

    /// Outermost batches closed so far
    pub(crate) fn completed(&self) -> u64 {
        self.completed.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_old_value_wins() {
        let batch = BatchCoordinator::new();
        batch.open();
        batch.touch("a.b", Some(json!(0)), "a.b");
        batch.touch("a.b", Some(json!(1)), "a.b");

        let touched = batch.close().unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].old_value, Some(json!(0)));

        // The next batch starts empty
        batch.open();
        assert_eq!(batch.close().unwrap(), vec![]);
    }

    #[test]
    fn test_trigger_tracks_latest_write() {
        let batch = BatchCoordinator::new();
        batch.open();
        batch.touch("a", None, "a.x");
        batch.touch("a", Some(json!({"x": 1})), "a.y");
        let touched = batch.close().unwrap();
        assert_eq!(touched[0].trigger, "a.y");
        assert_eq!(touched[0].old_value, None);
    }

    #[test]
    fn test_nested_only_outermost_closes() {
        let batch = BatchCoordinator::new();
        batch.open();
        batch.open();
        batch.touch("x", None, "x");
        assert!(batch.close().is_none());
        assert!(batch.is_open());

        let touched = batch.close().unwrap();
        assert_eq!(touched.len(), 1);
        assert!(!batch.is_open());
        assert_eq!(batch.completed(), 1);
    }

    #[test]
    fn test_first_touch_order() {
        let batch = BatchCoordinator::new();
        batch.open();
        batch.touch("b", None, "b");
        batch.touch("a", None, "a");
        batch.touch("b", None, "b");
        let paths: Vec<String> = batch.close().unwrap().into_iter().map(|t| t.watcher_path).collect();
        assert_eq!(paths, vec!["b", "a"]);
    }
}
