//! xdperf dataplane
//!
//! Kernel-side half of the traffic generator: installs generated packet
//! templates into per-CPU XDP maps, drives the `xdp_tx` program from
//! core-pinned threads with live-frame test runs, and samples receive
//! counters.
//!
//! # Architecture
//!
//! ```text
//!  templates ──▶ tables::install ──▶ tx_override_map / seq_state_map
//!                                          │ (per-CPU, key 0)
//!                                          ▼
//!  dispatch::Dispatcher ──▶ xdperf-tx-0 … xdperf-tx-N ──▶ xdp_tx (LIVE_FRAMES)
//!                                          │
//!  stats::sample  ◀──────────────── stats_map
//! ```
//!
//! Kernel access sits behind small traits ([`KernelTables`],
//! [`CounterSource`], [`TxProgram`], [`AffinityPinner`]) with aya-backed
//! implementations in [`bpf`] and [`affinity`].

pub mod affinity;
pub mod bpf;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod packet;
pub mod stats;
pub mod tables;
pub mod template;

pub use affinity::{AffinityPinner, SchedAffinity};
pub use bpf::{XdpObjects, XdpTxProgram};
pub use dispatch::{
    DispatchConfig, DispatchReport, DispatchState, Dispatcher, RunOptions, TxProgram, WorkerOutcome,
};
pub use error::{BpfError, DispatchError, TableError};
pub use stats::{CounterSource, Rate, RateMeter, Totals};
pub use tables::{install, KernelTables};
pub use template::{DataRec, PacketTemplate, PktTemplate, MAX_TEMPLATE_SIZE};
