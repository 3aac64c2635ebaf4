//! Prometheus metrics for blockswap subsystems.
//!
//! All metrics follow the naming convention: `bx_<subsystem>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., blocks_stored_total)
//! - **Gauge**: Value that can go up or down (e.g., sessions_active)
//! - **Histogram**: Distribution of values (e.g., gc_duration_seconds)

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BLOCKSTORE METRICS (bx-01)
    // =========================================================================

    /// Blocks written to the datastore
    pub static ref BLOCKS_STORED: Counter = Counter::new(
        "bx_blockstore_blocks_stored_total",
        "Total number of blocks written to the datastore"
    ).expect("metric creation failed");

    /// Blocks deleted from the datastore
    pub static ref BLOCKS_DELETED: Counter = Counter::new(
        "bx_blockstore_blocks_deleted_total",
        "Total number of blocks deleted from the datastore"
    ).expect("metric creation failed");

    /// Cache lookups by layer and outcome
    pub static ref CACHE_LOOKUPS: CounterVec = CounterVec::new(
        Opts::new("bx_blockstore_cache_lookups_total", "Cache lookups by layer and outcome"),
        &["layer", "outcome"]  // layer: bloom/arc, outcome: hit/miss
    ).expect("metric creation failed");

    /// Reads that failed digest verification
    pub static ref HASH_MISMATCHES: Counter = Counter::new(
        "bx_blockstore_hash_mismatches_total",
        "Blocks whose bytes did not match their CID on read"
    ).expect("metric creation failed");

    // =========================================================================
    // PINNING / GC METRICS (bx-02)
    // =========================================================================

    /// Blocks removed by garbage collection
    pub static ref GC_BLOCKS_REMOVED: Counter = Counter::new(
        "bx_gc_blocks_removed_total",
        "Total number of blocks removed by garbage collection"
    ).expect("metric creation failed");

    /// Garbage collection run duration
    pub static ref GC_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bx_gc_duration_seconds",
            "Time spent in a full mark and sweep"
        ).buckets(exponential_buckets(0.001, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // PROVIDER METRICS (bx-03)
    // =========================================================================

    /// Provide calls by outcome
    pub static ref PROVIDES: CounterVec = CounterVec::new(
        Opts::new("bx_providers_provides_total", "Provide announcements by outcome"),
        &["outcome"]  // outcome: ok/failed
    ).expect("metric creation failed");

    /// Provider records expired by the sweep
    pub static ref PROVIDER_RECORDS_EXPIRED: Counter = Counter::new(
        "bx_providers_records_expired_total",
        "Provider records removed after their validity elapsed"
    ).expect("metric creation failed");

    // =========================================================================
    // EXCHANGE METRICS (bx-04)
    // =========================================================================

    /// Blocks received from peers
    pub static ref BLOCKS_RECEIVED: Counter = Counter::new(
        "bx_exchange_blocks_received_total",
        "Total blocks received from peers"
    ).expect("metric creation failed");

    /// Blocks received that were already held
    pub static ref DUP_BLOCKS_RECEIVED: Counter = Counter::new(
        "bx_exchange_dup_blocks_received_total",
        "Blocks received from peers that were already stored locally"
    ).expect("metric creation failed");

    /// Payload bytes by direction
    pub static ref EXCHANGE_BYTES: CounterVec = CounterVec::new(
        Opts::new("bx_exchange_bytes_total", "Block payload bytes exchanged"),
        &["direction"]  // direction: sent/received
    ).expect("metric creation failed");

    /// Messages by direction
    pub static ref EXCHANGE_MESSAGES: CounterVec = CounterVec::new(
        Opts::new("bx_exchange_messages_total", "Protocol messages exchanged"),
        &["direction"]  // direction: sent/received
    ).expect("metric creation failed");

    /// Current size of the local wantlist
    pub static ref WANTLIST_SIZE: Gauge = Gauge::new(
        "bx_exchange_wantlist_size",
        "Number of CIDs currently wanted"
    ).expect("metric creation failed");

    /// Live fetch sessions
    pub static ref SESSIONS_ACTIVE: Gauge = Gauge::new(
        "bx_exchange_sessions_active",
        "Number of running fetch sessions"
    ).expect("metric creation failed");

    /// Connected peers
    pub static ref PEERS_CONNECTED: Gauge = Gauge::new(
        "bx_exchange_peers_connected",
        "Number of peers with an open message queue"
    ).expect("metric creation failed");
}

static REGISTER: Once = Once::new();

/// Handle proving metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

fn collectors() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Blockstore
        Box::new(BLOCKS_STORED.clone()),
        Box::new(BLOCKS_DELETED.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(HASH_MISMATCHES.clone()),
        // Pinning / GC
        Box::new(GC_BLOCKS_REMOVED.clone()),
        Box::new(GC_DURATION.clone()),
        // Providers
        Box::new(PROVIDES.clone()),
        Box::new(PROVIDER_RECORDS_EXPIRED.clone()),
        // Exchange
        Box::new(BLOCKS_RECEIVED.clone()),
        Box::new(DUP_BLOCKS_RECEIVED.clone()),
        Box::new(EXCHANGE_BYTES.clone()),
        Box::new(EXCHANGE_MESSAGES.clone()),
        Box::new(WANTLIST_SIZE.clone()),
        Box::new(SESSIONS_ACTIVE.clone()),
        Box::new(PEERS_CONNECTED.clone()),
    ]
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let mut result = Ok(());
    REGISTER.call_once(|| {
        for metric in collectors() {
            if let Err(e) = REGISTRY.register(metric) {
                result = Err(TelemetryError::MetricsInit(e.to_string()));
                return;
            }
        }
    });
    result.map(|()| MetricsHandle { _private: () })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
