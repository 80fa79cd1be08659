use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use crate::{
    observer::{LogEvent, Observer, ObserverError, Severity},
    pipeline::PipelineStage,
};

/// Available output formats for batch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Console,
    Markdown,
    Json,
    Yaml,
}

/// Terminal state of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    Done,
    Skipped,
    Failed,
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PageStatus::Done => "done",
            PageStatus::Skipped => "skipped",
            PageStatus::Failed => "failed",
        };
        f.pad(label)
    }
}

/// What happened to one page of the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    pub page: String,
    pub target: Option<String>,
    pub status: PageStatus,
    /// Stage the page was in when it failed
    pub stage: Option<PipelineStage>,
    pub reason: Option<String>,
    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn is_done(&self) -> bool {
        self.status == PageStatus::Done
    }

    pub fn is_skipped(&self) -> bool {
        self.status == PageStatus::Skipped
    }

    pub fn is_failed(&self) -> bool {
        self.status == PageStatus::Failed
    }

    /// One human-readable line, as printed in the console report
    pub fn summary_line(&self) -> String {
        let marker = match self.status {
            PageStatus::Done => "✓",
            PageStatus::Skipped => "-",
            PageStatus::Failed => "✗",
        };
        let mut line = format!("  {} {:<8} {}", marker, self.status, self.page);
        if let Some(ref target) = self.target {
            if self.status == PageStatus::Done {
                line.push_str(&format!(" -> {}", target));
            }
        }
        if let Some(ref reason) = self.reason {
            match self.stage {
                Some(stage) => line.push_str(&format!(" ({} at {})", reason, stage)),
                None => line.push_str(&format!(" ({})", reason)),
            }
        }
        line
    }
}

/// Counts across the batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// The per-page results of a batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<PageOutcome>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<PageOutcome>) -> Self {
        let summary = BatchSummary {
            total: outcomes.len(),
            succeeded: outcomes.iter().filter(|o| o.is_done()).count(),
            skipped: outcomes.iter().filter(|o| o.is_skipped()).count(),
            failed: outcomes.iter().filter(|o| o.is_failed()).count(),
        };
        Self { outcomes, summary }
    }

    pub fn outcome(&self, page: &str) -> Option<&PageOutcome> {
        self.outcomes.iter().find(|o| o.page == page)
    }
}

/// Renders batch reports in the configured format
pub struct TransformationReporter {
    output_format: ReportFormat,
}

impl TransformationReporter {
    pub fn new() -> Self {
        Self {
            output_format: ReportFormat::Console,
        }
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn format_report(&self, report: &BatchReport) -> Result<String, ReportError> {
        match self.output_format {
            ReportFormat::Console => Ok(self.format_console_report(report)),
            ReportFormat::Markdown => Ok(self.format_markdown_report(report)),
            ReportFormat::Json => serde_json::to_string_pretty(report)
                .map_err(|e| ReportError::SerializationError(e.to_string())),
            ReportFormat::Yaml => serde_yaml::to_string(report)
                .map_err(|e| ReportError::SerializationError(e.to_string())),
        }
    }

    fn format_console_report(&self, report: &BatchReport) -> String {
        let mut output = String::new();
        output.push_str("=== Page Transformation Report ===\n\n");
        for outcome in &report.outcomes {
            output.push_str(&outcome.summary_line());
            output.push('\n');
        }
        output.push_str(&format!(
            "\nPages: {}  Done: {}  Skipped: {}  Failed: {}\n",
            report.summary.total, report.summary.succeeded, report.summary.skipped, report.summary.failed
        ));
        output
    }

    fn format_markdown_report(&self, report: &BatchReport) -> String {
        let mut output = String::new();
        output.push_str("# Page Transformation Report\n\n");
        output.push_str("| Page | Status | Target | Stage | Reason | Duration (ms) |\n");
        output.push_str("|---|---|---|---|---|---|\n");
        for outcome in &report.outcomes {
            output.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                outcome.page,
                outcome.status,
                outcome.target.as_deref().unwrap_or(""),
                outcome.stage.map(|s| s.to_string()).unwrap_or_default(),
                outcome.reason.as_deref().unwrap_or("").replace('|', "\\|"),
                outcome.duration_ms
            ));
        }
        output.push_str(&format!(
            "\n**Done:** {} · **Skipped:** {} · **Failed:** {}\n",
            report.summary.succeeded, report.summary.skipped, report.summary.failed
        ));
        output
    }
}

impl Default for TransformationReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

enum ReportTarget {
    File(PathBuf),
    Writer {
        label: String,
        writer: Box<dyn Write + Send>,
    },
}

impl ReportTarget {
    fn label(&self) -> String {
        match self {
            ReportTarget::File(path) => path.display().to_string(),
            ReportTarget::Writer { label, .. } => label.clone(),
        }
    }
}

/// Batch-writing sink: buffers events and appends a formatted log report to
/// its target only when flushed
pub struct ReportObserver {
    format: ReportFormat,
    min_severity: Severity,
    buffer: Mutex<Vec<LogEvent>>,
    target: Mutex<ReportTarget>,
}

impl ReportObserver {
    /// Append reports to a file, created on first flush
    pub fn to_file(path: impl Into<PathBuf>, format: ReportFormat) -> Self {
        Self::with_target(ReportTarget::File(path.into()), format)
    }

    pub fn to_writer(label: impl Into<String>, writer: impl Write + Send + 'static, format: ReportFormat) -> Self {
        Self::with_target(
            ReportTarget::Writer {
                label: label.into(),
                writer: Box::new(writer),
            },
            format,
        )
    }

    fn with_target(target: ReportTarget, format: ReportFormat) -> Self {
        Self {
            format,
            min_severity: Severity::Warning,
            buffer: Mutex::new(Vec::new()),
            target: Mutex::new(target),
        }
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    fn render(&self, events: &[LogEvent]) -> Result<String, ObserverError> {
        let mut by_page: BTreeMap<&str, Vec<&LogEvent>> = BTreeMap::new();
        for event in events {
            by_page
                .entry(event.page.as_deref().unwrap_or("(run)"))
                .or_default()
                .push(event);
        }

        match self.format {
            ReportFormat::Json => {
                serde_json::to_string_pretty(&by_page).map_err(|e| ObserverError::Render(e.to_string()))
            }
            ReportFormat::Yaml => serde_yaml::to_string(&by_page).map_err(|e| ObserverError::Render(e.to_string())),
            ReportFormat::Console => {
                let mut output = String::new();
                for (page, events) in &by_page {
                    output.push_str(&format!("== {}\n", page));
                    for event in events {
                        output.push_str(&format!("  [{}] {}\n", event.severity, describe(event)));
                    }
                }
                Ok(output)
            }
            ReportFormat::Markdown => {
                let mut output = String::from("# Transformation Log\n");
                for (page, events) in &by_page {
                    output.push_str(&format!("\n## {}\n\n", page));
                    for event in events {
                        output.push_str(&format!("- **{}** {}\n", event.severity, describe(event)));
                    }
                }
                Ok(output)
            }
        }
    }
}

fn describe(event: &LogEvent) -> String {
    let mut text = match event.heading {
        Some(ref heading) => format!("{}: {}", heading, event.message),
        None => event.message.clone(),
    };
    if let Some(ref error) = event.error {
        text.push_str(&format!(" ({})", error));
    }
    text
}

impl Observer for ReportObserver {
    fn log(&self, event: &LogEvent) {
        if event.severity >= self.min_severity {
            self.buffer.lock().push(event.clone());
        }
    }

    /// Events stay buffered until they have been written, so a failed flush
    /// can be retried.
    fn flush(&self) -> Result<(), ObserverError> {
        // Held throughout so concurrent flushes cannot write the same events twice
        let mut target = self.target.lock();
        let events = self.buffer.lock().clone();
        if events.is_empty() {
            return Ok(());
        }
        let rendered = self.render(&events)?;

        let label = target.label();
        let result = match &mut *target {
            ReportTarget::File(path) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&*path)
                .and_then(|mut file| file.write_all(rendered.as_bytes())),
            ReportTarget::Writer { writer, .. } => writer
                .write_all(rendered.as_bytes())
                .and_then(|_| writer.flush()),
        };
        result.map_err(|source| ObserverError::Write { target: label, source })?;

        // Events logged while writing stay for the next flush
        self.buffer.lock().drain(..events.len());
        Ok(())
    }
}
