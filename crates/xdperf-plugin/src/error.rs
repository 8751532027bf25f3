//! Error types for the plugin sandbox

use std::path::PathBuf;
use thiserror::Error;

/// Plugin sandbox error type
#[derive(Error, Debug)]
pub enum PluginError {
    /// Linker or engine setup failed
    #[error("failed to set up sandbox host: {0}")]
    HostSetup(#[source] wasmtime::Error),

    /// A plugin with this name is already registered
    #[error("plugin {0} already loaded")]
    AlreadyLoaded(String),

    /// No plugin with this name is registered
    #[error("plugin {0} not loaded")]
    NotLoaded(String),

    /// Module bytes could not be read from the plugin directory
    #[error("failed to read plugin {name} from {}: {source}", path.display())]
    Read {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Compilation or instantiation of the guest failed
    #[error("failed to instantiate plugin {name}: {source}")]
    Instantiate {
        name: String,
        #[source]
        source: wasmtime::Error,
    },

    /// A required export is absent
    #[error("plugin {name} missing required export {export}")]
    MissingExport { name: String, export: &'static str },

    /// An export exists but with an unexpected signature
    #[error("plugin {name} export {export} has an unexpected signature: {source}")]
    Signature {
        name: String,
        export: &'static str,
        #[source]
        source: wasmtime::Error,
    },

    /// Input larger than the 32-bit guest address space
    #[error("input of {0} bytes does not fit in guest memory")]
    InputTooLarge(usize),

    /// Guest allocator failed or trapped
    #[error("guest allocation of {size} bytes failed: {source}")]
    Alloc {
        size: u32,
        #[source]
        source: wasmtime::Error,
    },

    /// Bounds-checked access to linear memory failed
    #[error("guest memory access at {ptr:#x} (+{len}) out of bounds")]
    MemoryAccess {
        ptr: u32,
        len: usize,
        #[source]
        source: wasmtime::MemoryAccessError,
    },

    /// Guest call trapped
    #[error("{export} trapped: {source}")]
    Trap {
        export: &'static str,
        #[source]
        source: wasmtime::Error,
    },

    /// `plugin_init` returned a nonzero status
    #[error("plugin_init returned error code: {0}")]
    InitFailed(u32),

    /// `plugin_process` returned a negative status: failure inside the plugin
    #[error("plugin reported failure (code {0})")]
    Guest(i32),

    /// Response does not fit in the fixed output buffer
    #[error("output buffer too small: capacity {capacity} bytes{}", written_suffix(*written))]
    OutputTooSmall { capacity: u32, written: Option<u32> },

    /// `plugin_cleanup` failed during unload
    #[error("plugin {name} cleanup failed: {source}")]
    Cleanup {
        name: String,
        #[source]
        source: wasmtime::Error,
    },
}

fn written_suffix(written: Option<u32>) -> String {
    written.map(|w| format!(", plugin wrote {w}")).unwrap_or_default()
}

impl PluginError {
    /// True when the failure originated inside the plugin rather than the host.
    pub fn is_plugin_failure(&self) -> bool {
        matches!(
            self,
            PluginError::Guest(_) | PluginError::OutputTooSmall { written: None, .. }
        )
    }
}

/// Typed adapter error
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Request could not be serialized
    #[error("failed to marshal input: {0}")]
    Encode(#[source] serde_json::Error),

    /// Response bytes could not be deserialized
    #[error("failed to unmarshal output: {0}")]
    Decode(#[source] serde_json::Error),

    /// Sandbox call failed
    #[error("failed to call plugin: {0}")]
    Sandbox(#[from] PluginError),
}

/// Result type for sandbox operations
pub type PluginResult<T> = Result<T, PluginError>;
