//! Host function bindings for WASM plugins.
//!
//! Registers the `env` host module every plugin links against:
//!
//! - `host_log(level: i32, msg_ptr: i32, msg_len: i32)`
//! - `host_report_metric(name_ptr: i32, name_len: i32, value: f64, timestamp: i64)`
//!
//! Strings are read out of the calling guest's exported `memory` through
//! bounds-checked accessors. A bad pointer drops the message, it never
//! traps the guest.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use wasmtime::{Caller, Linker};
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::error::PluginError;

/// Severity attached to a guest log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl GuestLogLevel {
    /// Map the raw level passed through `host_log`.
    pub fn from_raw(level: u32) -> Self {
        match level {
            0 => GuestLogLevel::Debug,
            1 => GuestLogLevel::Info,
            2 => GuestLogLevel::Warn,
            _ => GuestLogLevel::Error,
        }
    }
}

/// Callbacks a guest can reach through its `env` imports.
///
/// Constructed once and handed to [`crate::PluginHost`]; every loaded
/// module shares the same instance.
pub trait HostCallbacks: Send + Sync {
    /// A guest log line.
    fn log(&self, plugin: &str, level: GuestLogLevel, message: &str);

    /// A guest metric sample with its timestamp already normalized.
    fn metric(&self, plugin: &str, name: &str, value: f64, at: SystemTime);
}

/// Default callbacks: forward everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCallbacks;

impl HostCallbacks for TracingCallbacks {
    fn log(&self, plugin: &str, level: GuestLogLevel, message: &str) {
        match level {
            GuestLogLevel::Debug => tracing::debug!(plugin, guest_message = %message, "plugin log"),
            GuestLogLevel::Info => tracing::info!(plugin, guest_message = %message, "plugin log"),
            GuestLogLevel::Warn => tracing::warn!(plugin, guest_message = %message, "plugin log"),
            GuestLogLevel::Error => tracing::error!(plugin, guest_message = %message, "plugin log"),
        }
    }

    fn metric(&self, plugin: &str, name: &str, value: f64, at: SystemTime) {
        let unix_secs = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
        tracing::info!(plugin, metric = name, value, unix_secs, "plugin metric");
    }
}

/// Infer the unit of a guest timestamp from its magnitude relative to `now`.
///
/// Anything above `now_ns / 100` is nanoseconds, above `now_ns / 1e5`
/// microseconds, above `now_ns / 1e8` milliseconds, otherwise seconds.
/// Negative values are reinterpreted as unsigned first.
pub fn normalize_timestamp(timestamp: i64, now: SystemTime) -> SystemTime {
    let now_ns = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let now_ns = u64::try_from(now_ns).unwrap_or(u64::MAX);
    let ts = timestamp as u64;

    let offset = if ts > now_ns / 100 {
        Duration::from_nanos(ts)
    } else if ts > now_ns / 100_000 {
        Duration::from_micros(ts)
    } else if ts > now_ns / 100_000_000 {
        Duration::from_millis(ts)
    } else {
        Duration::from_secs(ts)
    };

    UNIX_EPOCH.checked_add(offset).unwrap_or(now)
}

/// Per-store state visible to host functions.
pub(crate) struct HostState {
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) plugin: String,
    pub(crate) callbacks: Arc<dyn HostCallbacks>,
}

impl HostState {
    pub(crate) fn new(plugin: &str, callbacks: Arc<dyn HostCallbacks>) -> Self {
        let wasi = wasmtime_wasi::WasiCtxBuilder::new()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();
        Self {
            wasi,
            plugin: plugin.to_string(),
            callbacks,
        }
    }
}

fn read_guest_string(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Option<String> {
    let memory = caller.get_export("memory")?.into_memory()?;
    let start = ptr as usize;
    let end = start.checked_add(len as usize)?;
    let bytes = memory.data(&*caller).get(start..end)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Build the linker shared by every plugin: WASI preview1 plus the `env` callbacks.
pub(crate) fn build_linker(engine: &wasmtime::Engine) -> Result<Linker<HostState>, PluginError> {
    let mut linker = Linker::new(engine);

    wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut HostState| {
        &mut state.wasi
    })
    .map_err(PluginError::HostSetup)?;

    linker
        .func_wrap(
            "env",
            "host_log",
            |mut caller: Caller<'_, HostState>, level: u32, ptr: u32, len: u32| {
                let Some(message) = read_guest_string(&mut caller, ptr, len) else {
                    return;
                };
                let state = caller.data();
                state.callbacks.log(&state.plugin, GuestLogLevel::from_raw(level), &message);
            },
        )
        .map_err(PluginError::HostSetup)?;

    linker
        .func_wrap(
            "env",
            "host_report_metric",
            |mut caller: Caller<'_, HostState>, ptr: u32, len: u32, value: f64, timestamp: i64| {
                let Some(name) = read_guest_string(&mut caller, ptr, len) else {
                    return;
                };
                let at = normalize_timestamp(timestamp, SystemTime::now());
                let state = caller.data();
                state.callbacks.metric(&state.plugin, &name, value, at);
            },
        )
        .map_err(PluginError::HostSetup)?;

    Ok(linker)
}
