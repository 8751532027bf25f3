//! Dataplane error types

use thiserror::Error;

/// Per-CPU table installation error
#[derive(Error, Debug)]
pub enum TableError {
    /// Generator produced nothing to install
    #[error("no packet templates to install")]
    NoTemplates,

    /// Declared length outside `0 < length < data.len()`
    #[error("invalid packet length: {length} (template {index} carries {available} bytes)")]
    InvalidLength { index: usize, length: u16, available: usize },

    /// Template does not fit the kernel slot
    #[error("template {index} is {size} bytes, slot holds {max}")]
    TemplateTooLarge { index: usize, size: usize, max: usize },

    /// Possible-CPU count could not be determined
    #[error("failed to get possible CPUs: {0}")]
    PossibleCpus(#[source] std::io::Error),

    /// Map update failed
    #[error("failed to update {map}: {source}")]
    Write {
        map: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Map lookup failed
    #[error("failed to read {map}: {source}")]
    Read {
        map: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// TX worker error
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Could not bind the worker thread to its core
    #[error("failed to set CPU affinity to core {core}: {source}")]
    Affinity {
        core: usize,
        #[source]
        source: std::io::Error,
    },

    /// Program handle could not be duplicated for the worker
    #[error("failed to clone XDP program: {0}")]
    Clone(#[source] std::io::Error),

    /// The test-run syscall failed
    #[error("bpf_prog_run failed: {0}")]
    Run(#[source] std::io::Error),

    /// The program ran but returned nonzero
    #[error("bpf_prog_run returned non-zero: {0}")]
    NonZeroReturn(u32),

    /// Worker thread could not be created
    #[error("failed to spawn worker for core {core}: {source}")]
    Spawn {
        core: usize,
        #[source]
        source: std::io::Error,
    },

    /// Worker thread panicked
    #[error("worker for core {0} panicked")]
    Panicked(usize),

    /// `start` called outside the Idle state
    #[error("dispatcher is {0:?}, expected Idle")]
    InvalidState(crate::dispatch::DispatchState),
}

/// Kernel object loading error
#[derive(Error, Debug)]
pub enum BpfError {
    #[error("failed to load BPF object {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: aya::BpfError,
    },

    #[error("BPF object has no map {0}")]
    MissingMap(&'static str),

    #[error("BPF object has no program {0}")]
    MissingProgram(&'static str),

    #[error("map {name}: {source}")]
    Map {
        name: &'static str,
        #[source]
        source: aya::maps::MapError,
    },

    #[error("program {name}: {source}")]
    Program {
        name: &'static str,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("failed to duplicate program fd: {0}")]
    Fd(#[source] std::io::Error),
}
