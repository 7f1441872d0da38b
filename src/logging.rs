use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_core::{Event, Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::GitOpsError;

const DEFAULT_MAX_LOG_FILES: usize = 5;
const MAX_LOG_MEMORY_BYTES: usize = 2 * 1024 * 1024; // 2MB
const LOG_FILE_PREFIX: &str = "gitops";

#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    pub target: String,
    pub message: String,
}

fn serialize_level<S: serde::Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(level.as_str())
}

impl LogEntry {
    fn size(&self) -> usize {
        std::mem::size_of::<LogEntry>() + self.target.len() + self.message.len()
    }
}

pub struct FileLogger {
    log_directory: PathBuf,
    max_files: usize,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Non-blocking writer over a rolling file. Keep the guard alive to flush on exit.
    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard), GitOpsError> {
        std::fs::create_dir_all(&self.log_directory)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .max_log_files(self.max_files)
            .build(&self.log_directory)
            .map_err(|e| GitOpsError::ConfigError(format!("Failed to create log file: {}", e)))?;

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Most recent log lines, bounded by their total size
pub struct RecentLogs {
    logs: VecDeque<LogEntry>,
    max_total_memory_size: usize,
    current_size: usize,
}

impl RecentLogs {
    pub fn new(max_total_memory_size: usize) -> Self {
        Self {
            logs: VecDeque::new(),
            max_total_memory_size,
            current_size: 0,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        let entry_size = entry.size();
        while !self.logs.is_empty() && self.current_size + entry_size > self.max_total_memory_size {
            if let Some(oldest) = self.logs.pop_front() {
                self.current_size -= oldest.size();
            }
        }
        self.current_size += entry_size;
        self.logs.push_back(entry);
    }

    /// Entries at `level` or more severe, oldest first
    pub fn at_least(&self, level: Level) -> Vec<LogEntry> {
        self.logs
            .iter()
            .filter(|entry| entry.level <= level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl Default for RecentLogs {
    fn default() -> Self {
        Self::new(MAX_LOG_MEMORY_BYTES)
    }
}

/// Helper to extract log message
#[derive(Default)]
struct LogEntryVisitor {
    message: String,
    fields: Vec<String>,
}

impl tracing::field::Visit for LogEntryVisitor {
    fn record_str(&mut self, field: &tracing_core::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &tracing_core::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Tracing layer feeding [`RecentLogs`]
#[derive(Clone, Default)]
pub struct RecentLogsLayer {
    logs: Arc<Mutex<RecentLogs>>,
}

impl RecentLogsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<RecentLogs>> {
        Arc::clone(&self.logs)
    }
}

impl<S: Subscriber> Layer<S> for RecentLogsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = LogEntryVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        if !visitor.fields.is_empty() {
            message = format!("{} {}", message, visitor.fields.join(" "));
        }

        let metadata = event.metadata();
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message,
        };

        if let Ok(mut logs) = self.logs.lock() {
            logs.push(entry);
        }
    }
}

/// Installs the global subscriber: env filter, console, recent logs and an optional file.
///
/// The returned guard must be held for the lifetime of the process when file logging is on.
pub fn setup_logging(
    file_logger: Option<&FileLogger>,
) -> Result<(RecentLogsLayer, Option<WorkerGuard>), GitOpsError> {
    let recent = RecentLogsLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file_logger {
        Some(logger) => {
            let (writer, guard) = logger.setup_file_logging()?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(recent.clone())
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| GitOpsError::ConfigError(format!("Failed to install logger: {}", e)))?;

    Ok((recent, guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(level: Level, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level,
            target: "vcs_gitops".into(),
            message: message.into(),
        }
    }

    #[test]
    fn evicts_oldest_entries_past_memory_limit() {
        let one = entry(Level::INFO, "x").size();
        let mut logs = RecentLogs::new(one * 3);
        for _ in 0..5 {
            logs.push(entry(Level::INFO, "x"));
        }
        assert_eq!(logs.len(), 3);
    }

    #[test]
    fn filters_by_severity() {
        let mut logs = RecentLogs::default();
        logs.push(entry(Level::DEBUG, "noise"));
        logs.push(entry(Level::WARN, "careful"));
        logs.push(entry(Level::ERROR, "broken"));
        let warnings: Vec<String> = logs
            .at_least(Level::WARN)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(warnings, ["careful", "broken"]);
    }

    #[test]
    fn layer_records_message_and_fields() {
        let layer = RecentLogsLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(pr = "https://host/pr/1", "Failed to upsert comment");
        });
        let logs = layer.handle();
        let logs = logs.lock().unwrap();
        let recorded = logs.at_least(Level::WARN);
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].message.starts_with("Failed to upsert comment"));
        assert!(recorded[0].message.contains("pr=https://host/pr/1"));
    }
}
