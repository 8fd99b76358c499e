//! ModuleHost - loads and unloads modules against one Bridge

use eyre::{Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::context::ModuleContext;
use super::module::BridgeModule;
use crate::bridge::Bridge;

/// What happened to a module's handles at unload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnloadReport {
    #[serde(rename = "module-id")]
    pub module_id: String,

    /// Handles issued through the module's context
    pub issued: usize,

    /// Handles the module disposed itself, before or during `stop`
    #[serde(rename = "disposed-by-module")]
    pub disposed_by_module: usize,

    /// Handles still active after `stop`, disposed by the host
    pub reclaimed: usize,

    #[serde(rename = "stop-error", skip_serializing_if = "Option::is_none")]
    pub stop_error: Option<String>,
}

impl UnloadReport {
    /// Whether the module cleaned up everything it registered
    pub fn is_clean(&self) -> bool {
        self.reclaimed == 0 && self.stop_error.is_none()
    }
}

struct LoadedModule {
    module: Box<dyn BridgeModule>,
    context: ModuleContext,
}

/// Loads modules in any order and tears them down with a leak check
pub struct ModuleHost {
    bridge: Bridge,
    modules: Vec<LoadedModule>,
}

impl ModuleHost {
    pub fn new(bridge: Bridge) -> Self {
        debug!("ModuleHost::new: called");
        Self {
            bridge,
            modules: Vec::new(),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Start `module` and keep it loaded
    ///
    /// If `start` fails, everything it registered is disposed and the error
    /// is returned.
    pub fn load(&mut self, mut module: Box<dyn BridgeModule>) -> Result<()> {
        let id = module.id().to_string();
        debug!(module_id = %id, "ModuleHost::load: called");
        if self.is_loaded(&id) {
            bail!("Module '{}' is already loaded", id);
        }

        let context = self.bridge.scope(&id);
        if let Err(e) = module.start(&context) {
            let reclaimed = context.dispose_all();
            warn!(module_id = %id, reclaimed, error = %e, "Module failed to start");
            return Err(e.wrap_err(format!("Module '{}' failed to start", id)));
        }

        info!(module_id = %id, issued = context.issued(), "Module loaded");
        self.modules.push(LoadedModule { module, context });
        Ok(())
    }

    /// Stop `module_id`, then dispose whatever it left behind
    ///
    /// A failing `stop` is recorded in the report; the module is unloaded
    /// regardless.
    pub fn unload(&mut self, module_id: &str) -> Result<UnloadReport> {
        debug!(%module_id, "ModuleHost::unload: called");
        let Some(pos) = self.modules.iter().position(|m| m.context.module_id() == module_id) else {
            bail!("Module '{}' is not loaded", module_id);
        };
        let LoadedModule { mut module, context } = self.modules.remove(pos);

        let stop_error = module.stop(&context).err().map(|e| {
            warn!(%module_id, error = %e, "Module stop failed");
            format!("{:#}", e)
        });

        let issued = context.issued();
        let disposed_by_module = issued - context.active();
        let reclaimed = context.dispose_all();
        if reclaimed > 0 {
            warn!(%module_id, reclaimed, issued, "Module left handles active at unload");
        }
        info!(%module_id, issued, disposed_by_module, reclaimed, "Module unloaded");

        Ok(UnloadReport {
            module_id: module_id.to_string(),
            issued,
            disposed_by_module,
            reclaimed,
            stop_error,
        })
    }

    /// Unload every module, most recently loaded first
    pub fn unload_all(&mut self) -> Vec<UnloadReport> {
        debug!(count = self.modules.len(), "ModuleHost::unload_all: called");
        let ids: Vec<String> = self.loaded().into_iter().rev().collect();
        ids.iter().filter_map(|id| self.unload(id).ok()).collect()
    }

    /// Loaded module ids in load order
    pub fn loaded(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|m| m.context.module_id().to_string())
            .collect()
    }

    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.modules.iter().any(|m| m.context.module_id() == module_id)
    }
}
