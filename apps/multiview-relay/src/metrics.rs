use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::warn;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static SESSIONS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "multiview_sessions_created_total",
        "session records created",
    ))
    .expect("valid metric options");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static DIRECTORY_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "multiview_directory_writes_total",
            "directory writes by operation and outcome",
        ),
        &["op", "outcome"],
    )
    .expect("valid metric options");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static MESSAGES_RELAYED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "multiview_channel_messages_total",
        "channel messages accepted for fan-out",
    ))
    .expect("valid metric options");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static CONNECTED_MEMBERS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::with_opts(Opts::new(
        "multiview_channel_members",
        "websocket members currently attached",
    ))
    .expect("valid metric options");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub fn record_write(op: &str, outcome: &str) {
    DIRECTORY_WRITES.with_label_values(&[op, outcome]).inc();
}

/// Forces registration so `/metrics` lists every family from the start.
pub fn init() {
    Lazy::force(&SESSIONS_CREATED);
    Lazy::force(&DIRECTORY_WRITES);
    Lazy::force(&MESSAGES_RELAYED);
    Lazy::force(&CONNECTED_MEMBERS);
}

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %err, "metrics encode error");
    }
    buffer
}
