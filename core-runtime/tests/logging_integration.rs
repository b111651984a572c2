//! Integration tests for logging system

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{
    init_logging, redact_if_sensitive, strip_query, LogFormat, LoggingConfig,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CollectingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Warn
    }
}

// Global subscriber can only be installed once per process, so the whole
// lifecycle lives in a single test.
#[test]
fn test_init_logging_forwards_to_sink_once() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(sink.clone());

    init_logging(config.clone()).unwrap();

    tracing::info!(target: "core_cache", "below sink level");
    tracing::warn!(target: "core_realtime", attempts = 5u64, "reconnect limit reached");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "reconnect limit reached");
        assert_eq!(entries[0].fields.get("attempts"), Some(&"5".to_string()));
    }

    assert!(init_logging(config).is_err());
}

#[test]
fn test_invalid_filter_rejected() {
    let config = LoggingConfig::default().with_filter("core_api=loudest");
    assert!(init_logging(config).is_err());
}

#[test]
fn test_redaction_of_identifiers() {
    assert_eq!(redact_if_sensitive("user_id", "user_123"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("bearer", "abc"), "[REDACTED]");

    let redacted = redact_if_sensitive("author", "user@example.com");
    assert!(redacted.starts_with('u'));
    assert!(!redacted.contains("example.com"));

    assert_eq!(redact_if_sensitive("comment_id", "c-9"), "c-9");
}

#[test]
fn test_query_stripping() {
    assert_eq!(
        strip_query("https://folio.example/api/realtime?token=abc"),
        "https://folio.example/api/realtime"
    );
    assert_eq!(strip_query(""), "");
}
