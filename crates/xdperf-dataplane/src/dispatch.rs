//! Concurrent TX dispatch
//!
//! One dedicated OS thread per worker. Worker *i* pins itself to core *i*,
//! owns a duplicate of the transmit program handle and issues a single
//! live-frame test run of `count / parallelism` repetitions. The remainder
//! of that division is not sent. Afterwards it parks on the shared
//! cancellation token; shutdown cancels the token and joins every thread.
//!
//! ```text
//! Idle ──start──▶ Running ──cancel──▶ Draining ──join──▶ Stopped
//! ```

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::thread;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::affinity::AffinityPinner;
use crate::error::DispatchError;

/// `BPF_F_TEST_XDP_LIVE_FRAMES`: frames produced by the program are really
/// transmitted instead of being returned to the caller.
pub const XDP_LIVE_FRAMES: u32 = libbpf_sys::BPF_F_TEST_XDP_LIVE_FRAMES;

/// Arguments of one test-run invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub data: Vec<u8>,
    pub repeat: u32,
    pub flags: u32,
}

/// A transmit program that can be test-run.
pub trait TxProgram: Send + Sync {
    /// Duplicate the handle; the clone is released when dropped.
    fn try_clone(&self) -> io::Result<Box<dyn TxProgram>>;

    /// Run once and return the program's return value.
    fn test_run(&self, opts: &RunOptions) -> io::Result<u32>;
}

/// Dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Largest repeat count the kernel accepts for one test run.
pub const MAX_REPEAT: u32 = i32::MAX as u32;

fn requested_per_worker(count: u64, parallelism: usize) -> u64 {
    count.checked_div(parallelism as u64).unwrap_or(0)
}

/// Repetitions each worker runs; any remainder is dropped and the result
/// is capped at [`MAX_REPEAT`].
pub fn repeat_per_worker(count: u64, parallelism: usize) -> u32 {
    let per_worker = requested_per_worker(count, parallelism);
    u32::try_from(per_worker).map_or(MAX_REPEAT, |n| n.min(MAX_REPEAT))
}

/// Whether [`repeat_per_worker`] had to cap the per-worker share.
pub fn repeat_is_capped(count: u64, parallelism: usize) -> bool {
    requested_per_worker(count, parallelism) > u64::from(MAX_REPEAT)
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of workers; worker *i* runs on core *i*
    pub parallelism: usize,
    /// Total packets requested across all workers
    pub count: u64,
    /// Seed frame handed to the program
    pub packet: Vec<u8>,
}

impl DispatchConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            data: self.packet.clone(),
            repeat: repeat_per_worker(self.count, self.parallelism),
            flags: XDP_LIVE_FRAMES,
        }
    }
}

/// How one worker ended.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub core: usize,
    pub result: Result<(), DispatchError>,
}

/// Per-worker outcomes after shutdown.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<WorkerOutcome>,
}

impl DispatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

struct WorkerHandle {
    core: usize,
    thread: thread::JoinHandle<Result<(), DispatchError>>,
}

/// Core-pinned TX worker pool
pub struct Dispatcher {
    program: Arc<dyn TxProgram>,
    pinner: Arc<dyn AffinityPinner>,
    config: DispatchConfig,
    token: CancellationToken,
    state: DispatchState,
    workers: Vec<WorkerHandle>,
}

impl Dispatcher {
    pub fn new(
        program: Arc<dyn TxProgram>,
        pinner: Arc<dyn AffinityPinner>,
        config: DispatchConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            program,
            pinner,
            config,
            token,
            state: DispatchState::Idle,
            workers: Vec::new(),
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawn every worker. Workers already spawned keep running if a later
    /// one fails to start; call [`Dispatcher::stop`] to collect them.
    pub fn start(&mut self, runtime: Handle) -> Result<(), DispatchError> {
        if self.state != DispatchState::Idle {
            return Err(DispatchError::InvalidState(self.state));
        }
        self.state = DispatchState::Running;

        let opts = Arc::new(self.config.run_options());
        tracing::info!(
            workers = self.config.parallelism,
            repeat = opts.repeat,
            dropped = self.config.count % self.config.parallelism.max(1) as u64,
            "starting TX workers"
        );
        if repeat_is_capped(self.config.count, self.config.parallelism) {
            tracing::warn!(
                requested = requested_per_worker(self.config.count, self.config.parallelism),
                repeat = opts.repeat,
                "per-worker count exceeds the kernel repeat limit, sending fewer packets"
            );
        }

        for core in 0..self.config.parallelism {
            let program = self.program.try_clone().map_err(DispatchError::Clone)?;
            let pinner = Arc::clone(&self.pinner);
            let opts = Arc::clone(&opts);
            let token = self.token.clone();
            let runtime = runtime.clone();

            let thread = thread::Builder::new()
                .name(format!("xdperf-tx-{core}"))
                .spawn(move || worker_main(core, program, &*pinner, &opts, &token, &runtime))
                .map_err(|source| DispatchError::Spawn { core, source })?;

            self.workers.push(WorkerHandle { core, thread });
        }
        Ok(())
    }

    /// Cancel the token and join every worker.
    pub async fn stop(&mut self) -> DispatchReport {
        self.token.cancel();
        if self.state == DispatchState::Stopped {
            return DispatchReport::default();
        }
        self.state = DispatchState::Draining;

        let workers = std::mem::take(&mut self.workers);
        let cores: Vec<usize> = workers.iter().map(|w| w.core).collect();
        let outcomes = tokio::task::spawn_blocking(move || {
            workers
                .into_iter()
                .map(|w| WorkerOutcome {
                    core: w.core,
                    result: w.thread.join().unwrap_or(Err(DispatchError::Panicked(w.core))),
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "join task failed");
            cores
                .into_iter()
                .map(|core| WorkerOutcome {
                    core,
                    result: Err(DispatchError::Panicked(core)),
                })
                .collect()
        });

        self.state = DispatchState::Stopped;
        tracing::info!(workers = outcomes.len(), "TX workers stopped");
        DispatchReport { outcomes }
    }

    /// Start, wait for `shutdown` (or an external cancel), then stop.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<DispatchReport, DispatchError>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start(Handle::current()) {
            self.stop().await;
            return Err(e);
        }

        tokio::select! {
            _ = shutdown => tracing::info!("shutdown requested"),
            _ = self.token.cancelled() => {}
        }
        Ok(self.stop().await)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Detached threads still exit once the token fires.
        self.token.cancel();
    }
}

fn transmit(
    core: usize,
    program: &dyn TxProgram,
    pinner: &dyn AffinityPinner,
    opts: &RunOptions,
) -> Result<(), DispatchError> {
    pinner
        .pin_current(core)
        .map_err(|source| DispatchError::Affinity { core, source })?;

    let ret = program.test_run(opts).map_err(DispatchError::Run)?;
    if ret != 0 {
        return Err(DispatchError::NonZeroReturn(ret));
    }
    Ok(())
}

fn worker_main(
    core: usize,
    program: Box<dyn TxProgram>,
    pinner: &dyn AffinityPinner,
    opts: &RunOptions,
    token: &CancellationToken,
    runtime: &Handle,
) -> Result<(), DispatchError> {
    let result = transmit(core, &*program, pinner, opts);
    match &result {
        Ok(()) => tracing::debug!(core, repeat = opts.repeat, "TX run complete"),
        Err(e) => tracing::error!(core, error = %e, "TX worker failed"),
    }

    runtime.block_on(token.cancelled());
    drop(program);
    result
}
