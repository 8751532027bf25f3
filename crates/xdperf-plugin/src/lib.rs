//! xdperf plugin sandbox
//!
//! Loads packet generator and verifier plugins compiled to WebAssembly and
//! runs them inside wasmtime. A plugin exports a small C-style ABI
//! (`plugin_init`, `plugin_process`, `malloc`, `free`, optionally
//! `plugin_cleanup`); the host marshals JSON across linear memory and the
//! adapters in [`generator`] and [`verifier`] give it types.
//!
//! ```no_run
//! use xdperf_plugin::{GeneratorAdapter, GeneratorRequest, PluginHost};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host = PluginHost::new("/usr/local/lib/xdperf/plugins")?;
//! let generator = GeneratorAdapter::new(host.load("simple")?);
//! generator.initialize(b"{}")?;
//! let templates = generator.generate(&GeneratorRequest::new(1000, [0x02, 0, 0, 0, 0, 1]))?;
//! # let _ = templates;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod generator;
pub mod host;
pub mod metadata;
pub mod registry;
pub mod sandbox;
pub mod types;
pub mod verifier;

pub use error::{AdapterError, PluginError, PluginResult};
pub use generator::{call_json, GeneratorAdapter};
pub use host::{GuestLogLevel, HostCallbacks, TracingCallbacks};
pub use metadata::{PluginKind, PluginMetadata};
pub use registry::PluginHost;
pub use sandbox::{PluginModule, OUTPUT_CAPACITY};
pub use types::*;
pub use verifier::VerifierAdapter;
