//! Reactive store
//!
//! A single nested mapping addressed by dotted paths, with per-path watchers,
//! batched notification and lazy selectors.

mod batch;
mod path;
mod reactive;
mod selector;
mod tree;

pub use path::{PATH_DELIMITER, StorePath};
pub use reactive::{Change, Store, StoreMetrics};
pub use selector::{ObservableCell, Selector};
