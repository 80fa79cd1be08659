use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Severity of a log event, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// A structured diagnostic emitted by any component of the transformation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub severity: Severity,
    pub message: String,
    pub heading: Option<String>,
    pub page: Option<String>,
    pub error: Option<String>,
}

impl LogEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            heading: None,
            page: None,
            error: None,
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(Severity::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn with_page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    /// Attach the originating error; only its rendered message is kept
    pub fn with_error(mut self, error: &dyn fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Failed to write report to {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render report: {0}")]
    Render(String),
}

/// A sink that receives every event logged on the bus
pub trait Observer: Send + Sync {
    fn log(&self, event: &LogEvent);

    /// Write out anything buffered. Calling this repeatedly must be harmless.
    fn flush(&self) -> Result<(), ObserverError>;
}

/// Fan-out registry of observers, built once per run and passed down explicitly
#[derive(Default)]
pub struct ObserverBus {
    observers: Vec<Box<dyn Observer>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.register(observer);
        self
    }

    pub fn register(&mut self, observer: impl Observer + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver the event to every observer, in registration order
    pub fn log(&self, event: LogEvent) {
        for observer in &self.observers {
            observer.log(&event);
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogEvent::debug(message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEvent::info(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogEvent::warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogEvent::error(message));
    }

    /// Flush every observer. Sink failures are reported back onto the bus and
    /// otherwise dropped; they never reach the caller.
    pub fn flush(&self) {
        let mut failures = Vec::new();
        for observer in &self.observers {
            if let Err(err) = observer.flush() {
                failures.push(err);
            }
        }

        for err in failures {
            self.log(
                LogEvent::error("Observer flush failed")
                    .with_heading("Observer")
                    .with_error(&err),
            );
        }
    }
}

/// In-process sink that records events so tests can assert on them
#[derive(Clone, Default)]
pub struct CountingObserver {
    events: Arc<Mutex<Vec<LogEvent>>>,
    flushes: Arc<AtomicUsize>,
}

impl CountingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.severity == severity)
            .count()
    }

    pub fn count_matching(&self, predicate: impl Fn(&LogEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl Observer for CountingObserver {
    fn log(&self, event: &LogEvent) {
        self.events.lock().push(event.clone());
    }

    fn flush(&self) -> Result<(), ObserverError> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Forwards events to the `tracing` subscriber installed by the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn log(&self, event: &LogEvent) {
        let heading = event.heading.as_deref().unwrap_or("");
        let page = event.page.as_deref().unwrap_or("");
        let error = event.error.as_deref().unwrap_or("");
        match event.severity {
            Severity::Debug => tracing::debug!(heading, page, error, "{}", event.message),
            Severity::Info => tracing::info!(heading, page, error, "{}", event.message),
            Severity::Warning => tracing::warn!(heading, page, error, "{}", event.message),
            Severity::Error => tracing::error!(heading, page, error, "{}", event.message),
        }
    }

    fn flush(&self) -> Result<(), ObserverError> {
        Ok(())
    }
}
