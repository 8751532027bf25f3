//! Kernel object handles
//!
//! Loads the compiled XDP object with aya, takes typed handles to the three
//! per-CPU maps and loads (without attaching) the `xdp_tx` program. Live
//! frame test runs go through `bpf_prog_test_run_opts` from libbpf-sys
//! since they need the `BPF_F_TEST_XDP_LIVE_FRAMES` flag.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::Path;

use aya::maps::{MapData, PerCpuArray, PerCpuValues};
use aya::programs::Xdp;
use aya::Bpf;

use crate::dispatch::{RunOptions, TxProgram};
use crate::error::{BpfError, TableError};
use crate::stats::{CounterSource, STATS_MAP};
use crate::tables::{KernelTables, SEQ_STATE_MAP, TX_OVERRIDE_MAP};
use crate::template::{DataRec, PktTemplate};

/// Transmit program name in the object
pub const TX_PROGRAM: &str = "xdp_tx";

/// Everything a run needs from the kernel object.
pub struct XdpObjects {
    pub tables: BpfTables,
    pub stats: StatsTable,
    pub program: XdpTxProgram,
    // Keeps the loaded program and its maps alive.
    _bpf: Bpf,
}

impl XdpObjects {
    pub fn load(path: &Path) -> Result<Self, BpfError> {
        let mut bpf = Bpf::load_file(path).map_err(|source| BpfError::Load {
            path: path.display().to_string(),
            source,
        })?;

        let tables = BpfTables {
            tx_override: take_per_cpu(&mut bpf, TX_OVERRIDE_MAP)?,
            seq_state: take_per_cpu(&mut bpf, SEQ_STATE_MAP)?,
        };
        let stats = StatsTable {
            counters: take_per_cpu(&mut bpf, STATS_MAP)?,
        };

        let program: &mut Xdp = bpf
            .program_mut(TX_PROGRAM)
            .ok_or(BpfError::MissingProgram(TX_PROGRAM))?
            .try_into()
            .map_err(|source| BpfError::Program {
                name: TX_PROGRAM,
                source,
            })?;
        program.load().map_err(|source| BpfError::Program {
            name: TX_PROGRAM,
            source,
        })?;
        let fd = program
            .fd()
            .map_err(|source| BpfError::Program {
                name: TX_PROGRAM,
                source,
            })?
            .as_fd()
            .try_clone_to_owned()
            .map_err(BpfError::Fd)?;

        tracing::info!(object = %path.display(), program = TX_PROGRAM, "BPF object loaded");
        Ok(Self {
            tables,
            stats,
            program: XdpTxProgram { fd },
            _bpf: bpf,
        })
    }
}

fn take_per_cpu<V: aya::Pod>(
    bpf: &mut Bpf,
    name: &'static str,
) -> Result<PerCpuArray<MapData, V>, BpfError> {
    let map = bpf.take_map(name).ok_or(BpfError::MissingMap(name))?;
    PerCpuArray::try_from(map).map_err(|source| BpfError::Map { name, source })
}

/// `tx_override_map` and `seq_state_map`
pub struct BpfTables {
    tx_override: PerCpuArray<MapData, PktTemplate>,
    seq_state: PerCpuArray<MapData, u32>,
}

fn write_key0<V: aya::Pod>(
    map: &mut PerCpuArray<MapData, V>,
    name: &'static str,
    values: Vec<V>,
) -> Result<(), TableError> {
    let write_err =
        |source: Box<dyn std::error::Error + Send + Sync>| TableError::Write { map: name, source };
    let values = PerCpuValues::try_from(values).map_err(|e| write_err(e.into()))?;
    map.set(0, values, 0).map_err(|e| write_err(e.into()))
}

impl KernelTables for BpfTables {
    fn possible_cpus(&self) -> io::Result<usize> {
        aya::util::nr_cpus()
    }

    fn write_seq_state(&mut self, values: Vec<u32>) -> Result<(), TableError> {
        write_key0(&mut self.seq_state, SEQ_STATE_MAP, values)
    }

    fn write_tx_override(&mut self, slots: Vec<PktTemplate>) -> Result<(), TableError> {
        write_key0(&mut self.tx_override, TX_OVERRIDE_MAP, slots)
    }
}

/// `stats_map`
pub struct StatsTable {
    counters: PerCpuArray<MapData, DataRec>,
}

impl CounterSource for StatsTable {
    fn read_counters(&mut self) -> Result<Vec<DataRec>, TableError> {
        let values = self.counters.get(&0, 0).map_err(|e| TableError::Read {
            map: STATS_MAP,
            source: e.into(),
        })?;
        Ok(values.iter().copied().collect())
    }
}

/// Loaded `xdp_tx` program, held through its own fd.
#[derive(Debug)]
pub struct XdpTxProgram {
    fd: OwnedFd,
}

impl TxProgram for XdpTxProgram {
    fn try_clone(&self) -> io::Result<Box<dyn TxProgram>> {
        Ok(Box::new(Self { fd: self.fd.try_clone()? }))
    }

    fn test_run(&self, opts: &RunOptions) -> io::Result<u32> {
        let data_size_in = u32::try_from(opts.data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seed frame too large"))?;

        // SAFETY: all-zero is a valid bpf_test_run_opts; `sz` is set below as
        // libbpf requires.
        let mut attr: libbpf_sys::bpf_test_run_opts = unsafe { std::mem::zeroed() };
        attr.sz = std::mem::size_of::<libbpf_sys::bpf_test_run_opts>() as _;
        attr.data_in = opts.data.as_ptr().cast();
        attr.data_size_in = data_size_in;
        let repeat = i32::try_from(opts.repeat).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "repeat exceeds kernel limit")
        })?;
        attr.repeat = repeat as _;
        attr.flags = opts.flags;

        // SAFETY: `attr` points at valid memory for the duration of the call
        // and `data_in` outlives it; the kernel only reads from it.
        let ret = unsafe { libbpf_sys::bpf_prog_test_run_opts(self.fd.as_raw_fd(), &mut attr) };
        if ret < 0 {
            return Err(io::Error::from_raw_os_error(-ret));
        }
        Ok(attr.retval)
    }
}
