use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use safesim_events::{EventPublisher, EventRecord};
use safesim_logging::{JsonLogger, LogLevel, LogRecord};
use serde_json::Value;

/// Builder for [`PipelineTelemetry`].
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: Option<LogLevel>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder for `module`.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: None,
            event_publisher: None,
        }
    }

    /// Writes JSON-lines logs to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Publishes milestones on `publisher`.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Opens the log file and builds the handle.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = match self.log_path {
            Some(path) => {
                let logger = JsonLogger::new(path)?;
                Some(match self.min_level {
                    Some(level) => logger.with_min_level(level),
                    None => logger,
                })
            }
            None => None,
        };
        Ok(PipelineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Log and event sinks shared by the pipeline, the batch runner and the runtime.
#[derive(Clone)]
pub struct PipelineTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Module name stamped on records.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Appends a structured log record; object metadata becomes record fields.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            if logger.enabled(level) {
                let record =
                    LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
                logger.log(&record)?;
            }
        }
        Ok(())
    }

    /// Publishes an event of `event_type`.
    pub async fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher
                .publish(EventRecord::new(&self.inner.module, event_type, payload))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safesim_events::MemoryEventBus;
    use safesim_logging::read_records;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_logs_and_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = PipelineTelemetry::builder("safesim.pipeline")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "pipeline.start", json!({ "facts": 5 }))
            .unwrap();
        telemetry
            .event("safesim.run.completed", json!({ "is_safe": true }))
            .await
            .unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "pipeline.start");
        assert_eq!(records[0].metadata["facts"], json!(5));
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "safesim.pipeline");
    }

    #[test]
    fn respects_minimum_level() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.log");
        let telemetry = PipelineTelemetry::builder("safesim")
            .log_path(&path)
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry.log(LogLevel::Debug, "noise", json!({})).unwrap();
        telemetry.log(LogLevel::Warn, "unsafe", json!({})).unwrap();
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn sinks_are_optional() {
        let telemetry = PipelineTelemetry::builder("safesim").build().unwrap();
        telemetry.log(LogLevel::Info, "ignored", json!({})).unwrap();
        telemetry.event("ignored", json!({})).await.unwrap();
    }
}
