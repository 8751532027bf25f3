//! Name-keyed registry of loaded plugins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use wasmtime::{Engine, Linker};

use crate::error::{PluginError, PluginResult};
use crate::host::{build_linker, HostCallbacks, HostState, TracingCallbacks};
use crate::metadata::PluginMetadata;
use crate::sandbox::PluginModule;

/// Plugin host: one engine and linker, many modules.
///
/// Modules are loaded from `<plugin_dir>/<name>.wasm`. Names are unique;
/// loading twice is rejected rather than replacing the live module.
pub struct PluginHost {
    plugin_dir: PathBuf,
    engine: Engine,
    linker: Linker<HostState>,
    callbacks: Arc<dyn HostCallbacks>,
    modules: RwLock<HashMap<String, Arc<PluginModule>>>,
}

impl PluginHost {
    /// Host whose guest logs and metrics go to `tracing`.
    pub fn new(plugin_dir: impl Into<PathBuf>) -> PluginResult<Self> {
        Self::with_callbacks(plugin_dir, Arc::new(TracingCallbacks))
    }

    pub fn with_callbacks(
        plugin_dir: impl Into<PathBuf>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> PluginResult<Self> {
        let engine = Engine::default();
        let linker = build_linker(&engine)?;
        Ok(Self {
            plugin_dir: plugin_dir.into(),
            engine,
            linker,
            callbacks,
            modules: RwLock::new(HashMap::new()),
        })
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Load and instantiate `<plugin_dir>/<name>.wasm`.
    pub fn load(&self, name: &str) -> PluginResult<Arc<PluginModule>> {
        // Held for the whole load so two callers cannot race on one name.
        let mut modules = self.modules.write();
        if modules.contains_key(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }

        let path = self.plugin_dir.join(format!("{name}.wasm"));
        let bytes = std::fs::read(&path).map_err(|source| PluginError::Read {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;
        let metadata = PluginMetadata::load(&self.plugin_dir, name);

        let module = Arc::new(PluginModule::instantiate(
            name,
            &bytes,
            metadata,
            &self.engine,
            &self.linker,
            Arc::clone(&self.callbacks),
        )?);
        modules.insert(name.to_string(), Arc::clone(&module));

        tracing::info!(
            plugin = name,
            version = %module.version(),
            path = %path.display(),
            "plugin loaded"
        );
        Ok(module)
    }

    /// Run the module's cleanup export, release its instance and drop it
    /// from the registry. Handles obtained earlier fail with `NotLoaded`.
    ///
    /// If cleanup fails the module stays registered and callable.
    pub fn unload(&self, name: &str) -> PluginResult<()> {
        let mut modules = self.modules.write();
        let module = modules
            .get(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;

        module.cleanup()?;
        module.close();
        modules.remove(name);
        tracing::info!(plugin = name, "plugin unloaded");
        Ok(())
    }

    pub fn get(&self, name: &str) -> PluginResult<Arc<PluginModule>> {
        self.modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))
    }

    /// Names of all loaded modules, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn init(&self, name: &str, config: &[u8]) -> PluginResult<()> {
        self.get(name)?.call_init(config)
    }

    pub fn call(&self, name: &str, input: &[u8]) -> PluginResult<Vec<u8>> {
        self.get(name)?.call_process(input)
    }

    /// Unload everything. Every module is attempted; the first failure is
    /// returned and the rest are logged.
    pub fn close(&self) -> PluginResult<()> {
        let mut first = None;
        for name in self.list() {
            if let Err(e) = self.unload(&name) {
                if first.is_none() {
                    first = Some(e);
                } else {
                    tracing::warn!(
                        plugin = %name,
                        error = %e,
                        "plugin unload failed during close"
                    );
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugin_dir", &self.plugin_dir)
            .field("modules", &self.list())
            .finish_non_exhaustive()
    }
}
