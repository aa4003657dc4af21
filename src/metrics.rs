// Prometheus metrics definitions for the bossfight bot.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Currently running fights (0 or 1).
    pub static ref ACTIVE_FIGHTS: IntGauge =
        IntGauge::new("bossfight_active_fights", "Currently running bossfights").unwrap();

    /// Players registered in the current fight.
    pub static ref REGISTERED_PLAYERS: IntGauge =
        IntGauge::new("bossfight_registered_players", "Players registered in the current fight").unwrap();

    /// Boss hit points in the current fight.
    pub static ref BOSS_HP: IntGauge =
        IntGauge::new("bossfight_boss_hp", "Boss hit points in the current fight").unwrap();

    /// Live chat bridge WebSocket connections.
    pub static ref CONNECTED_BRIDGES: IntGauge =
        IntGauge::new("bossfight_connected_bridges", "Live chat bridge connections").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total fights started.
    pub static ref FIGHTS_STARTED_TOTAL: IntCounter =
        IntCounter::new("bossfight_fights_started_total", "Total fights started").unwrap();

    /// Total fights settled, by outcome (victory, wipe).
    pub static ref FIGHTS_FINISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("bossfight_fights_finished_total", "Total fights settled"),
        &["outcome"],
    )
    .unwrap();

    /// Total fights cancelled by an admin.
    pub static ref FIGHTS_CANCELLED_TOTAL: IntCounter =
        IntCounter::new("bossfight_fights_cancelled_total", "Total fights cancelled").unwrap();

    /// Total turn hits registered.
    pub static ref HITS_TOTAL: IntCounter =
        IntCounter::new("bossfight_hits_total", "Turn hits registered").unwrap();

    /// Total critical hit attempts, by result (landed, missed).
    pub static ref CRITICAL_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("bossfight_critical_hits_total", "Critical hit attempts"),
        &["result"],
    )
    .unwrap();

    /// Total interludes launched, by kind.
    pub static ref INTERLUDES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("bossfight_interludes_total", "Interludes launched"),
        &["kind"],
    )
    .unwrap();

    /// Total interludes that ended with an error or panic, by kind.
    pub static ref INTERLUDES_FAILED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("bossfight_interludes_failed_total", "Interludes that failed"),
        &["kind"],
    )
    .unwrap();

    /// Total boss points awarded.
    pub static ref POINTS_AWARDED_TOTAL: IntCounter =
        IntCounter::new("bossfight_points_awarded_total", "Boss points awarded").unwrap();

    /// Total document store failures.
    pub static ref STORE_ERRORS_TOTAL: IntCounter =
        IntCounter::new("bossfight_store_errors_total", "Document store failures").unwrap();

    /// Total chat actions pushed to the bridge.
    pub static ref BRIDGE_MESSAGES_SENT_TOTAL: IntCounter = IntCounter::new(
        "bossfight_bridge_messages_sent_total",
        "Chat actions pushed to the bridge",
    )
    .unwrap();

    /// Total inbound chat events received.
    pub static ref EVENTS_RECEIVED_TOTAL: IntCounter =
        IntCounter::new("bossfight_events_received_total", "Inbound chat events").unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Fight duration in seconds.
    pub static ref FIGHT_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("bossfight_fight_duration_seconds", "Fight duration in seconds")
            .buckets(vec![60.0, 120.0, 300.0, 600.0, 900.0, 1200.0, 1800.0, 3600.0]),
    )
    .unwrap();

    /// Aggregate boss damage dealt per turn.
    pub static ref TURN_DAMAGE: Histogram = Histogram::with_opts(
        HistogramOpts::new("bossfight_turn_damage", "Boss damage per turn")
            .buckets(vec![0.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_FIGHTS.clone()),
        Box::new(REGISTERED_PLAYERS.clone()),
        Box::new(BOSS_HP.clone()),
        Box::new(CONNECTED_BRIDGES.clone()),
        Box::new(FIGHTS_STARTED_TOTAL.clone()),
        Box::new(FIGHTS_FINISHED_TOTAL.clone()),
        Box::new(FIGHTS_CANCELLED_TOTAL.clone()),
        Box::new(HITS_TOTAL.clone()),
        Box::new(CRITICAL_HITS_TOTAL.clone()),
        Box::new(INTERLUDES_TOTAL.clone()),
        Box::new(INTERLUDES_FAILED_TOTAL.clone()),
        Box::new(POINTS_AWARDED_TOTAL.clone()),
        Box::new(STORE_ERRORS_TOTAL.clone()),
        Box::new(BRIDGE_MESSAGES_SENT_TOTAL.clone()),
        Box::new(EVENTS_RECEIVED_TOTAL.clone()),
        Box::new(FIGHT_DURATION_SECONDS.clone()),
        Box::new(TURN_DAMAGE.clone()),
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
