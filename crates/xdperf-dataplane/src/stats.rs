//! Throughput sampling
//!
//! Reads the per-CPU `stats_map` once per interval, sums across CPUs and
//! reports the delta against the previous sample.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::TableError;
use crate::template::DataRec;

/// Name of the counters map in the kernel object
pub const STATS_MAP: &str = "stats_map";

/// Default sampling period
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Source of per-CPU receive counters.
pub trait CounterSource: Send {
    fn read_counters(&mut self) -> Result<Vec<DataRec>, TableError>;
}

/// Counters summed over all CPUs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub packets: u64,
    pub bytes: u64,
}

impl Totals {
    pub fn sum(recs: &[DataRec]) -> Self {
        recs.iter().fold(Self::default(), |acc, rec| Self {
            packets: acc.packets.wrapping_add(rec.rx_packets),
            bytes: acc.bytes.wrapping_add(rec.rx_bytes),
        })
    }
}

/// One interval's throughput
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub pps: u64,
    pub mbps: f64,
    pub totals: Totals,
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} xmit/s, {:.2} Mbps", self.pps, self.mbps)
    }
}

/// Delta tracker; the first observation is measured against zero.
#[derive(Debug, Default)]
pub struct RateMeter {
    previous: Totals,
}

impl RateMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, totals: Totals) -> Rate {
        let packets = totals.packets.wrapping_sub(self.previous.packets);
        let bytes = totals.bytes.wrapping_sub(self.previous.bytes);
        self.previous = totals;
        Rate {
            pps: packets,
            mbps: (bytes as f64 * 8.0) / 1024.0 / 1024.0,
            totals,
        }
    }
}

/// Sample `source` every `period` until `token` is cancelled, handing each
/// rate to `report`. A failed read is logged and the tick skipped.
pub async fn sample<C, R>(mut source: C, period: Duration, token: CancellationToken, mut report: R)
where
    C: CounterSource,
    R: FnMut(Rate),
{
    let mut meter = RateMeter::new();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("stats sampler stopping");
                break;
            }
            _ = ticker.tick() => {
                match source.read_counters() {
                    Ok(recs) => report(meter.observe(Totals::sum(&recs))),
                    Err(e) => tracing::warn!(error = %e, "failed to read stats"),
                }
            }
        }
    }
}
