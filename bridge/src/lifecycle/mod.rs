//! Module lifecycle
//!
//! Modules get a [`ModuleContext`] in `start` and again in `stop`. The
//! context records every handle it issues, so the host can dispose whatever a
//! module forgot and report how much it leaked.

mod context;
mod host;
mod module;

pub use context::ModuleContext;
pub use host::{ModuleHost, UnloadReport};
pub use module::BridgeModule;
