// Prometheus metrics definitions for the duel ranker.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Prefetched pairs waiting in the queue.
    pub static ref PAIR_QUEUE_DEPTH: IntGauge =
        IntGauge::new("duel_pair_queue_depth", "Prefetched pairs waiting in the queue").unwrap();

    /// Votes submitted to the store and not yet resolved (0 or 1).
    pub static ref VOTES_IN_FLIGHT: IntGauge =
        IntGauge::new("duel_votes_in_flight", "Votes awaiting the store").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Committed votes, by rating model.
    pub static ref VOTES_COMMITTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("duel_votes_committed_total", "Votes committed to the store"),
        &["model"],
    )
    .unwrap();

    /// Votes rejected without contacting the store, by reason.
    pub static ref VOTES_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("duel_votes_rejected_total", "Votes rejected by the session"),
        &["reason"],
    )
    .unwrap();

    /// Votes the store failed to apply.
    pub static ref VOTES_FAILED_TOTAL: IntCounter =
        IntCounter::new("duel_votes_failed_total", "Votes the store failed to apply").unwrap();

    /// Pairs produced by the generator.
    pub static ref PAIRS_GENERATED_TOTAL: IntCounter =
        IntCounter::new("duel_pairs_generated_total", "Pairs produced by the generator").unwrap();

    /// Batches that stopped early because the attempt budget ran out.
    pub static ref GENERATION_EXHAUSTED_TOTAL: IntCounter = IntCounter::new(
        "duel_generation_exhausted_total",
        "Pair batches stopped early on the attempt budget",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Time from vote submission to store confirmation.
    pub static ref VOTE_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("duel_vote_latency_seconds", "Vote round-trip to the store in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PAIR_QUEUE_DEPTH.clone()),
        Box::new(VOTES_IN_FLIGHT.clone()),
        Box::new(VOTES_COMMITTED_TOTAL.clone()),
        Box::new(VOTES_REJECTED_TOTAL.clone()),
        Box::new(VOTES_FAILED_TOTAL.clone()),
        Box::new(PAIRS_GENERATED_TOTAL.clone()),
        Box::new(GENERATION_EXHAUSTED_TOTAL.clone()),
        Box::new(VOTE_LATENCY_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
