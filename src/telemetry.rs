use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use crate::observer::{LogEvent, ObserverBus};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry channel unavailable: {0}")]
    Unavailable(String),

    #[error("Telemetry submission rejected: {0}")]
    Rejected(String),
}

/// A fire-and-forget telemetry event with string properties and numeric metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

impl TelemetryEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// The narrow telemetry transport interface
pub trait TelemetrySink: Send + Sync {
    fn track(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;
}

/// Run a telemetry call and discard its failure after noting it at debug level.
/// Only the telemetry channel is covered; nothing else should be wrapped in this.
pub fn best_effort(bus: &ObserverBus, submit: impl FnOnce() -> Result<(), TelemetryError>) {
    if let Err(err) = submit() {
        bus.log(
            LogEvent::debug("Telemetry submission failed")
                .with_heading("Telemetry")
                .with_error(&err),
        );
    }
}

/// Emits telemetry events as `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn track(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let properties = serde_json::to_string(&event.properties)
            .map_err(|e| TelemetryError::Rejected(e.to_string()))?;
        let metrics = serde_json::to_string(&event.metrics)
            .map_err(|e| TelemetryError::Rejected(e.to_string()))?;
        tracing::debug!(target: "telemetry", event = %event.name, %properties, %metrics);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{CountingObserver, Severity};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTelemetry {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl TelemetrySink for RecordingTelemetry {
        fn track(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct BrokenTelemetry;

    impl TelemetrySink for BrokenTelemetry {
        fn track(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
            Err(TelemetryError::Unavailable("offline".to_string()))
        }
    }

    #[test]
    fn test_best_effort_swallows_failures() {
        let counter = CountingObserver::new();
        let bus = ObserverBus::new().with_observer(counter.clone());
        let sink = BrokenTelemetry;

        best_effort(&bus, || sink.track(&TelemetryEvent::new("PageTransformStarted")));

        assert_eq!(counter.count(Severity::Debug), 1);
        assert_eq!(counter.count(Severity::Error), 0);
    }

    #[test]
    fn test_best_effort_passes_success_through() {
        let bus = ObserverBus::new();
        let sink = RecordingTelemetry::default();
        let event = TelemetryEvent::new("PageTransformDone")
            .with_property("page", "home.aspx")
            .with_metric("duration_ms", 12.0);

        best_effort(&bus, || sink.track(&event));

        assert_eq!(sink.events.lock()[0], event);
    }

    #[test]
    fn test_tracing_telemetry_accepts_events() {
        assert!(TracingTelemetry.track(&TelemetryEvent::new("x")).is_ok());
    }
}
