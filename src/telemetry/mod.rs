use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;

/// Sink for named counters and gauges emitted by the coordinators.
///
/// Calls are fire-and-forget: implementations must not fail and must not
/// block coordinator control flow.
pub trait TelemetrySink: Send + Sync {
    /// Increment a named counter
    fn incr_counter(&self, name: &str, value: u64);

    /// Record a point-in-time gauge value
    fn record_gauge(&self, name: &str, value: f64);
}

/// Sink for high-severity lifecycle events (lock takeover, transaction
/// recovery). Append-only from the coordinators' point of view; entries
/// are never read back by the core.
pub trait AuditSink: Send + Sync {
    fn record_event(&self, event: &str, metadata: &HashMap<String, String>);
}

/// Telemetry sink that drops everything
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn incr_counter(&self, _name: &str, _value: u64) {}
    fn record_gauge(&self, _name: &str, _value: f64) {}
}

/// Audit sink that drops everything
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record_event(&self, _event: &str, _metadata: &HashMap<String, String>) {}
}

/// Telemetry sink that forwards to the `log` facade at debug level
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn incr_counter(&self, name: &str, value: u64) {
        debug!("counter {} += {}", name, value);
    }

    fn record_gauge(&self, name: &str, value: f64) {
        debug!("gauge {} = {}", name, value);
    }
}

/// Capturing sink for assertions in tests and embedder diagnostics
#[derive(Default)]
pub struct RecordingTelemetry {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<Vec<(String, f64)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated value of a counter, zero if never incremented
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// All recorded values of a gauge, in emission order
    pub fn gauge_values(&self, name: &str) -> Vec<f64> {
        self.gauges
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn incr_counter(&self, name: &str, value: u64) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += value;
    }

    fn record_gauge(&self, name: &str, value: f64) {
        self.gauges.lock().push((name.to_string(), value));
    }
}

/// Capturing audit sink for tests
#[derive(Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, HashMap<String, String>)> {
        self.events.lock().clone()
    }
}

impl AuditSink for RecordingAudit {
    fn record_event(&self, event: &str, metadata: &HashMap<String, String>) {
        self.events
            .lock()
            .push((event.to_string(), metadata.clone()));
    }
}
