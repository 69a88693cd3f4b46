use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CYCLES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "node_cycles_total",
        "Ranging cycles run by the scheduler"
    ))
    .expect("valid metric");
    pub static ref RANGING_TIMEOUTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "node_ranging_timeouts_total",
        "Ranging cycles that got no echo"
    ))
    .expect("valid metric");
    pub static ref UPLOADS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "node_uploads_total",
        "Records accepted by the collector"
    ))
    .expect("valid metric");
    pub static ref UPLOAD_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "node_upload_failures_total",
        "Upload attempts that failed and were discarded"
    ))
    .expect("valid metric");
    pub static ref UPLOADS_SKIPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "node_uploads_skipped_total",
        "Upload slots skipped (no link or invalid ambient reading)"
    ))
    .expect("valid metric");
    pub static ref TIME_SYNC_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "node_time_sync_failures_total",
        "Failed time synchronizations"
    ))
    .expect("valid metric");
    pub static ref AMBIENT_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "node_ambient_failures_total",
        "Failed ambient reads (invalid local reading or weather query error)"
    ))
    .expect("valid metric");
    pub static ref UPLOAD_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "node_upload_latency_seconds",
            "Time taken by one upload attempt"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    )
    .expect("valid metric");
    pub static ref LAST_DISTANCE_CM: Gauge = Gauge::with_opts(Opts::new(
        "node_last_distance_cm",
        "Most recent measured distance, -1 when no echo"
    ))
    .expect("valid metric");
}

pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CYCLES_TOTAL.clone()),
        Box::new(RANGING_TIMEOUTS_TOTAL.clone()),
        Box::new(UPLOADS_TOTAL.clone()),
        Box::new(UPLOAD_FAILURES_TOTAL.clone()),
        Box::new(UPLOADS_SKIPPED_TOTAL.clone()),
        Box::new(TIME_SYNC_FAILURES_TOTAL.clone()),
        Box::new(AMBIENT_FAILURES_TOTAL.clone()),
        Box::new(UPLOAD_LATENCY_SECONDS.clone()),
        Box::new(LAST_DISTANCE_CM.clone()),
    ];

    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            warn!("Metric registration failed: {}", e);
        }
    }
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Metric encoding failed: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
