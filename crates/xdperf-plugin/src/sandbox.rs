//! A single instantiated guest module.
//!
//! `PluginModule` owns the wasmtime `Store`, the guest's exported linear
//! memory and the typed entry points resolved at load time. The host only
//! touches memory it obtained from the guest's own `malloc`, and frees
//! everything it allocated for a `process` call before returning. Once a
//! module is closed its store is dropped and every further call fails with
//! `NotLoaded`, even through handles obtained before the unload.
//!
//! ## Calling convention
//!
//! | Export | Signature | Required |
//! |---|---|---|
//! | `plugin_init` | `(ptr, len) -> status` | yes |
//! | `plugin_process` | `(in_ptr, in_len, out_ptr, out_cap) -> len_or_negative` | yes |
//! | `plugin_cleanup` | `()` | no |
//! | `malloc` | `(size) -> ptr` | yes |
//! | `free` | `(ptr)` | yes |

use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use wasmtime::{
    Engine, Instance, Linker, Memory, Module, Store, TypedFunc, WasmParams, WasmResults,
};

use crate::error::{PluginError, PluginResult};
use crate::host::{HostCallbacks, HostState};
use crate::metadata::PluginMetadata;

/// Fixed capacity of the scratch buffer handed to `plugin_process`.
pub const OUTPUT_CAPACITY: u32 = 1024 * 1024;

/// Status a guest returns when its response does not fit the output buffer.
pub const GUEST_OUTPUT_TOO_SMALL: i32 = -4;

const INIT_EXPORT: &str = "plugin_init";
const PROCESS_EXPORT: &str = "plugin_process";
const CLEANUP_EXPORT: &str = "plugin_cleanup";
const MALLOC_EXPORT: &str = "malloc";
const FREE_EXPORT: &str = "free";
const MEMORY_EXPORT: &str = "memory";
const REACTOR_START: &str = "_initialize";

/// Entry points of a fully-capable module, resolved once.
struct PluginExports {
    init: TypedFunc<(u32, u32), u32>,
    process: TypedFunc<(u32, u32, u32, u32), i32>,
    cleanup: Option<TypedFunc<(), ()>>,
    malloc: TypedFunc<u32, u32>,
    free: TypedFunc<u32, ()>,
}

/// Store, memory and exports. Everything that needs `&mut Store`.
struct Sandbox {
    store: Store<HostState>,
    memory: Memory,
    exports: PluginExports,
}

/// A loaded plugin.
///
/// Calls into one module are serialized by an internal mutex since every
/// guest call needs exclusive access to the store. `None` once closed.
pub struct PluginModule {
    name: String,
    metadata: PluginMetadata,
    sandbox: Mutex<Option<Sandbox>>,
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("name", &self.name)
            .field("version", &self.metadata.version)
            .finish_non_exhaustive()
    }
}

fn typed<P: WasmParams, R: WasmResults>(
    store: &mut Store<HostState>,
    instance: &Instance,
    name: &str,
    export: &'static str,
) -> PluginResult<Option<TypedFunc<P, R>>> {
    let Some(func) = instance.get_func(&mut *store, export) else {
        return Ok(None);
    };
    func.typed::<P, R>(&*store).map(Some).map_err(|source| PluginError::Signature {
        name: name.to_string(),
        export,
        source,
    })
}

fn required<P: WasmParams, R: WasmResults>(
    store: &mut Store<HostState>,
    instance: &Instance,
    name: &str,
    export: &'static str,
) -> PluginResult<TypedFunc<P, R>> {
    typed(store, instance, name, export)?.ok_or_else(|| PluginError::MissingExport {
        name: name.to_string(),
        export,
    })
}

impl PluginModule {
    /// Compile and instantiate `bytes`, then resolve every entry point.
    pub(crate) fn instantiate(
        name: &str,
        bytes: &[u8],
        metadata: PluginMetadata,
        engine: &Engine,
        linker: &Linker<HostState>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> PluginResult<Self> {
        let instantiate_err = |source| PluginError::Instantiate {
            name: name.to_string(),
            source,
        };

        let module = Module::new(engine, bytes).map_err(instantiate_err)?;
        let mut store = Store::new(engine, HostState::new(name, callbacks));
        let instance = linker.instantiate(&mut store, &module).map_err(instantiate_err)?;

        if let Some(start) = typed::<(), ()>(&mut store, &instance, name, REACTOR_START)? {
            start.call(&mut store, ()).map_err(instantiate_err)?;
        }

        // Allocator first: without it nothing can be marshaled.
        let malloc = required(&mut store, &instance, name, MALLOC_EXPORT)?;
        let free = required(&mut store, &instance, name, FREE_EXPORT)?;
        let init = required(&mut store, &instance, name, INIT_EXPORT)?;
        let process = required(&mut store, &instance, name, PROCESS_EXPORT)?;
        let cleanup = typed(&mut store, &instance, name, CLEANUP_EXPORT)?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| PluginError::MissingExport {
                name: name.to_string(),
                export: MEMORY_EXPORT,
            })?;

        tracing::debug!(
            plugin = name,
            version = %metadata.version,
            has_cleanup = cleanup.is_some(),
            "plugin instantiated"
        );

        Ok(Self {
            name: name.to_string(),
            metadata,
            sandbox: Mutex::new(Some(Sandbox {
                store,
                memory,
                exports: PluginExports {
                    init,
                    process,
                    cleanup,
                    malloc,
                    free,
                },
            })),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn has_cleanup(&self) -> bool {
        self.sandbox
            .lock()
            .as_ref()
            .is_some_and(|sandbox| sandbox.exports.cleanup.is_some())
    }

    pub fn is_closed(&self) -> bool {
        self.sandbox.lock().is_none()
    }

    fn live(&self) -> PluginResult<MappedMutexGuard<'_, Sandbox>> {
        MutexGuard::try_map(self.sandbox.lock(), Option::as_mut)
            .map_err(|_| PluginError::NotLoaded(self.name.clone()))
    }

    /// Hand `config` to `plugin_init`.
    ///
    /// The buffer belongs to the guest once `plugin_init` runs; the host
    /// does not free it.
    pub fn call_init(&self, config: &[u8]) -> PluginResult<()> {
        let mut guard = self.live()?;
        let sandbox = &mut *guard;
        let len = guest_len(config)?;
        let ptr = sandbox.write_new(config)?;

        let code = sandbox
            .exports
            .init
            .call(&mut sandbox.store, (ptr, len))
            .map_err(|source| PluginError::Trap {
                export: INIT_EXPORT,
                source,
            })?;

        if code != 0 {
            return Err(PluginError::InitFailed(code));
        }
        tracing::debug!(plugin = %self.name, config_len = len, "plugin initialized");
        Ok(())
    }

    /// Run `plugin_process` over `input` and return the bytes it wrote.
    pub fn call_process(&self, input: &[u8]) -> PluginResult<Vec<u8>> {
        let mut sandbox = self.live()?;
        let in_len = guest_len(input)?;
        let in_ptr = sandbox.write_new(input)?;

        let out_ptr = match sandbox.alloc(OUTPUT_CAPACITY) {
            Ok(ptr) => ptr,
            Err(e) => {
                if let Err(free_err) = sandbox.release(&[in_ptr]) {
                    tracing::warn!(error = %free_err, "guest free failed");
                }
                return Err(e);
            }
        };

        let result = sandbox.process(in_ptr, in_len, out_ptr);
        let freed = sandbox.release(&[in_ptr, out_ptr]);

        let output = result?;
        freed?;
        Ok(output)
    }

    /// Invoke `plugin_cleanup` when the module exports one.
    pub(crate) fn cleanup(&self) -> PluginResult<()> {
        let mut guard = self.live()?;
        let sandbox = &mut *guard;
        let Some(cleanup) = &sandbox.exports.cleanup else {
            return Ok(());
        };
        cleanup.call(&mut sandbox.store, ()).map_err(|source| PluginError::Cleanup {
            name: self.name.clone(),
            source,
        })
    }

    /// Drop the store and instance. Later calls return `NotLoaded`.
    pub(crate) fn close(&self) {
        if self.sandbox.lock().take().is_some() {
            tracing::debug!(plugin = %self.name, "plugin instance released");
        }
    }
}

fn guest_len(bytes: &[u8]) -> PluginResult<u32> {
    u32::try_from(bytes.len()).map_err(|_| PluginError::InputTooLarge(bytes.len()))
}

impl Sandbox {
    fn alloc(&mut self, size: u32) -> PluginResult<u32> {
        let ptr = self
            .exports
            .malloc
            .call(&mut self.store, size)
            .map_err(|source| PluginError::Alloc { size, source })?;
        if ptr == 0 && size > 0 {
            return Err(PluginError::Alloc {
                size,
                source: wasmtime::Error::msg("guest allocator returned null"),
            });
        }
        Ok(ptr)
    }

    fn free(&mut self, ptr: u32) -> PluginResult<()> {
        self.exports.free.call(&mut self.store, ptr).map_err(|source| PluginError::Trap {
            export: FREE_EXPORT,
            source,
        })
    }

    /// Free every pointer; the first failure is returned, later ones logged.
    fn release(&mut self, ptrs: &[u32]) -> PluginResult<()> {
        let mut first = None;
        for &ptr in ptrs {
            if let Err(e) = self.free(ptr) {
                if first.is_none() {
                    first = Some(e);
                } else {
                    tracing::warn!(ptr, error = %e, "guest free failed");
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Guest-allocate `data.len()` bytes and copy `data` in.
    fn write_new(&mut self, data: &[u8]) -> PluginResult<u32> {
        let ptr = self.alloc(guest_len(data)?)?;
        if let Err(source) = self.memory.write(&mut self.store, ptr as usize, data) {
            if let Err(free_err) = self.release(&[ptr]) {
                tracing::warn!(ptr, error = %free_err, "guest free failed");
            }
            return Err(PluginError::MemoryAccess {
                ptr,
                len: data.len(),
                source,
            });
        }
        Ok(ptr)
    }

    fn read(&self, ptr: u32, len: u32) -> PluginResult<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.memory
            .read(&self.store, ptr as usize, &mut buf)
            .map_err(|source| PluginError::MemoryAccess {
                ptr,
                len: len as usize,
                source,
            })?;
        Ok(buf)
    }

    fn process(&mut self, in_ptr: u32, in_len: u32, out_ptr: u32) -> PluginResult<Vec<u8>> {
        let ret = self
            .exports
            .process
            .call(&mut self.store, (in_ptr, in_len, out_ptr, OUTPUT_CAPACITY))
            .map_err(|source| PluginError::Trap {
                export: PROCESS_EXPORT,
                source,
            })?;

        match ret {
            GUEST_OUTPUT_TOO_SMALL => Err(PluginError::OutputTooSmall {
                capacity: OUTPUT_CAPACITY,
                written: None,
            }),
            code if code < 0 => Err(PluginError::Guest(code)),
            len if len as u32 > OUTPUT_CAPACITY => Err(PluginError::OutputTooSmall {
                capacity: OUTPUT_CAPACITY,
                written: Some(len as u32),
            }),
            len => self.read(out_ptr, len as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{const_guest, echo_guest, guest, host_with};

    #[test]
    fn test_process_echo_roundtrip() {
        let (_dir, host, _cb) = host_with(&[("hello", echo_guest())]);
        let module = host.load("hello").unwrap();

        let out = module.call_process(br#"{"sequence":7}"#).unwrap();
        assert_eq!(out, br#"{"status":"ok","sequence":7}"#.to_vec());
    }

    #[test]
    fn test_process_frees_both_buffers() {
        let (_dir, host, cb) = host_with(&[("hello", echo_guest())]);
        let module = host.load("hello").unwrap();

        module.call_process(br#"{"sequence":1}"#).unwrap();
        module.call_process(br#"{"sequence":2}"#).unwrap();
        assert_eq!(cb.count_logs("free"), 4);
    }

    #[test]
    fn test_init_passes_config_and_keeps_buffer() {
        let (_dir, host, cb) = host_with(&[("hello", echo_guest())]);
        let module = host.load("hello").unwrap();

        module.call_init(br#"{"payload_size":64}"#).unwrap();
        assert_eq!(cb.count_logs(r#"{"payload_size":64}"#), 1);
        assert_eq!(cb.count_logs("free"), 0);
    }

    #[test]
    fn test_init_reports_metric() {
        let (_dir, host, cb) = host_with(&[("hello", echo_guest())]);
        host.load("hello").unwrap().call_init(b"{}").unwrap();

        let metrics = cb.metrics.lock();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].0, "init");
        assert_eq!(metrics[0].1, 1.0);
        assert_eq!(
            metrics[0].2,
            std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000)
        );
    }

    #[test]
    fn test_init_nonzero_status() {
        let (_dir, host, _cb) = host_with(&[("hello", echo_guest())]);
        let module = host.load("hello").unwrap();

        let err = module.call_init(b"").unwrap_err();
        assert!(matches!(err, PluginError::InitFailed(1)));
    }

    #[test]
    fn test_negative_return_is_plugin_failure() {
        let (_dir, host, _cb) = host_with(&[("hello", echo_guest())]);
        let module = host.load("hello").unwrap();

        let err = module.call_process(b"").unwrap_err();
        assert!(matches!(err, PluginError::Guest(-1)));
        assert!(err.is_plugin_failure());
    }

    #[test]
    fn test_guest_reported_buffer_too_small() {
        let wasm = guest("(i32.const -4)", "");
        let (_dir, host, cb) = host_with(&[("small", wasm)]);
        let module = host.load("small").unwrap();

        let err = module.call_process(b"{}").unwrap_err();
        assert!(matches!(
            err,
            PluginError::OutputTooSmall {
                capacity: OUTPUT_CAPACITY,
                written: None
            }
        ));
        // Still released on the failure path.
        assert_eq!(cb.count_logs("free"), 2);
    }

    #[test]
    fn test_host_detected_buffer_too_small() {
        let wasm = guest("(i32.const 2000000)", "");
        let (_dir, host, _cb) = host_with(&[("liar", wasm)]);
        let module = host.load("liar").unwrap();

        let err = module.call_process(b"{}").unwrap_err();
        assert!(matches!(err, PluginError::OutputTooSmall { written: Some(2_000_000), .. }));
        assert!(!err.is_plugin_failure());
    }

    #[test]
    fn test_trap_is_surfaced_and_module_survives() {
        let wasm = guest(
            "(if (i32.eqz (local.get $in_len)) (then (unreachable))) (i32.const 0)",
            "",
        );
        let (_dir, host, _cb) = host_with(&[("trappy", wasm)]);
        let module = host.load("trappy").unwrap();

        let err = module.call_process(b"").unwrap_err();
        assert!(matches!(err, PluginError::Trap { export: "plugin_process", .. }));
        assert_eq!(host.list(), vec!["trappy".to_string()]);
        assert_eq!(module.call_process(b"x").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_const_response_read_exactly() {
        let (_dir, host, _cb) = host_with(&[("fixed", const_guest(r#"{"a":1}"#))]);
        let out = host.load("fixed").unwrap().call_process(b"ignored").unwrap();
        assert_eq!(out, br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn test_out_of_bounds_allocation() {
        let wat = r#"(module
            (memory (export "memory") 1)
            (func (export "malloc") (param i32) (result i32) (i32.const -256))
            (func (export "free") (param i32))
            (func (export "plugin_init") (param i32 i32) (result i32) (i32.const 0))
            (func (export "plugin_process") (param i32 i32 i32 i32) (result i32) (i32.const 0)))"#;
        let (_dir, host, _cb) = host_with(&[("oob", wat.to_string())]);
        let module = host.load("oob").unwrap();

        let err = module.call_process(b"hello").unwrap_err();
        assert!(matches!(err, PluginError::MemoryAccess { len: 5, .. }));
    }

    #[test]
    fn test_closed_module_rejects_calls() {
        let (_dir, host, cb) = host_with(&[("hello", echo_guest())]);
        let module = host.load("hello").unwrap();
        module.close();

        assert!(module.is_closed());
        assert!(!module.has_cleanup());
        let err = module.call_process(b"{}").unwrap_err();
        assert!(matches!(err, PluginError::NotLoaded(n) if n == "hello"));
        assert!(matches!(module.call_init(b"{}"), Err(PluginError::NotLoaded(_))));
        assert!(matches!(module.cleanup(), Err(PluginError::NotLoaded(_))));
        assert!(cb.logs.lock().is_empty());
    }
}
