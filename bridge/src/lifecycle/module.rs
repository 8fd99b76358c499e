//! BridgeModule trait

use eyre::Result;

use super::context::ModuleContext;

/// An independently loadable unit that talks to others only through the Bridge
pub trait BridgeModule {
    /// Unique id, used as the publish sender and for unloading
    fn id(&self) -> &str;

    /// Register services, channels and watchers
    ///
    /// Called exactly once when the module is loaded. On error every handle
    /// issued through `ctx` is disposed and the module is not loaded.
    fn start(&mut self, ctx: &ModuleContext) -> Result<()>;

    /// Release what `start` registered
    ///
    /// Called exactly once at unload. Handles still active afterwards are
    /// disposed by the host and counted as reclaimed.
    fn stop(&mut self, ctx: &ModuleContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}
