//! Log correlator
//!
//! Turns a window of raw `logcat -v epoch` output into structured
//! [`LogEvent`]s by matching caller-supplied [`Pattern`]s. The scan is
//! always bounded: one read of the log buffer from `since - lookback`,
//! capped at the configured number of tail lines.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::config::LogConfig;
use crate::common::{Error, Result};
use crate::device::{LogQuery, LogReader};

fn epoch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\.(\d{1,3})\b").expect("valid epoch regex"))
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\d+\.\d+\s+\d+\s+\d+\s+[VDIWEFA]\s+(.*?)\s*:\s")
            .expect("valid logcat header regex")
    })
}

/// Milliseconds since the Unix epoch from a `-v epoch` line prefix
pub fn parse_line_timestamp(line: &str) -> Option<u64> {
    let caps = epoch_re().captures(line)?;
    let secs: u64 = caps.get(1)?.as_str().parse().ok()?;
    let frac = caps.get(2)?.as_str();
    // "5" is 500 ms, "05" is 50 ms
    let millis: u64 = format!("{frac:0<3}").parse().ok()?;
    secs.checked_mul(1000)?.checked_add(millis)
}

/// Log tag of a `-v epoch` line
pub fn parse_line_source(line: &str) -> Option<&str> {
    header_re()
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// One raw line with its resolved timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp_ms: u64,
    pub source: String,
    pub raw: String,
}

/// Split raw log output into lines
///
/// Lines without a timestamp (continuations, banners) inherit the previous
/// line's timestamp; leading ones get 0.
pub fn parse_lines(raw: &str) -> Vec<LogLine> {
    let mut last_ts = 0u64;
    let mut last_source = String::new();
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            if let Some(ts) = parse_line_timestamp(line) {
                last_ts = ts;
                last_source = parse_line_source(line).unwrap_or("").to_string();
            }
            LogLine {
                timestamp_ms: last_ts,
                source: last_source.clone(),
                raw: line.to_string(),
            }
        })
        .collect()
}

/// A named regex with capture groups mapped to field names
#[derive(Debug, Clone)]
pub struct Pattern {
    pub name: String,
    regex: Regex,
    pub extract: BTreeMap<usize, String>,
}

impl Pattern {
    pub fn new(name: impl Into<String>, regex: &str) -> Result<Self> {
        let name = name.into();
        let regex = Regex::new(regex)
            .map_err(|e| Error::Config(format!("invalid log pattern '{name}': {e}")))?;
        Ok(Self {
            name,
            regex,
            extract: BTreeMap::new(),
        })
    }

    /// Map capture group `group` to `field`
    pub fn extract(mut self, group: usize, field: impl Into<String>) -> Self {
        self.extract.insert(group, field.into());
        self
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Match one line; unmatched groups are left out of the fields
    pub fn apply(&self, line: &LogLine) -> Option<LogEvent> {
        let caps = self.regex.captures(&line.raw)?;
        let fields = self
            .extract
            .iter()
            .filter_map(|(group, field)| {
                caps.get(*group)
                    .map(|m| (field.clone(), m.as_str().to_string()))
            })
            .collect();
        Some(LogEvent {
            timestamp_ms: line.timestamp_ms,
            source: line.source.clone(),
            raw_line: line.raw.clone(),
            pattern: self.name.clone(),
            fields,
        })
    }
}

/// A pattern match on a single log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp_ms: u64,
    pub source: String,
    pub raw_line: String,
    /// Name of the pattern that produced this event
    pub pattern: String,
    pub fields: BTreeMap<String, String>,
}

impl LogEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Whether a correlation id appears in an extracted field or the line
    pub fn mentions(&self, id: &str) -> bool {
        !id.is_empty() && (self.fields.values().any(|v| v == id) || self.raw_line.contains(id))
    }
}

/// Match every pattern against every line
///
/// Events come out in line order; a line matched by several patterns
/// yields one event per pattern, in the order the patterns were given.
pub fn match_lines(patterns: &[Pattern], lines: &[LogLine]) -> Vec<LogEvent> {
    lines
        .iter()
        .flat_map(|line| patterns.iter().filter_map(move |p| p.apply(line)))
        .collect()
}

/// Events mentioning a correlation id
pub fn find_correlated<'a>(events: &'a [LogEvent], id: &str) -> Vec<&'a LogEvent> {
    events.iter().filter(|e| e.mentions(id)).collect()
}

/// Position of the first event from `pattern`
pub fn first_index(events: &[LogEvent], pattern: &str) -> Option<usize> {
    events.iter().position(|e| e.pattern == pattern)
}

/// Whether the first `first` event precedes the first `second` event
pub fn happened_before(events: &[LogEvent], first: &str, second: &str) -> bool {
    match (first_index(events, first), first_index(events, second)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

/// Number of events from `pattern`
pub fn count(events: &[LogEvent], pattern: &str) -> usize {
    events.iter().filter(|e| e.pattern == pattern).count()
}

/// Reads a bounded window of the log buffer and extracts events
#[derive(Clone)]
pub struct LogCorrelator {
    logs: Arc<dyn LogReader>,
    max_lines: usize,
}

impl LogCorrelator {
    pub fn new(logs: Arc<dyn LogReader>, max_lines: usize) -> Self {
        Self { logs, max_lines }
    }

    pub fn from_config(logs: Arc<dyn LogReader>, config: &LogConfig) -> Self {
        Self::new(logs, config.max_lines)
    }

    /// Lines in `[since_ms - lookback, ..)`, at most `max_lines` of the newest
    pub async fn read_window(&self, since_ms: u64, lookback: Duration) -> Result<Vec<LogLine>> {
        let start = since_ms.saturating_sub(lookback.as_millis() as u64);
        let raw = self.logs.read_logs(LogQuery::Since(start)).await?;
        let mut lines: Vec<LogLine> = parse_lines(&raw)
            .into_iter()
            .filter(|line| line.timestamp_ms >= start)
            .collect();
        if lines.len() > self.max_lines {
            lines.drain(..lines.len() - self.max_lines);
        }
        Ok(lines)
    }

    /// Events matching `patterns` in the window ending now
    ///
    /// `lookback` widens the window backwards from `since_ms` so an event
    /// logged slightly before the triggering action (clock skew, buffering)
    /// is still found.
    pub async fn find_events(
        &self,
        patterns: &[Pattern],
        since_ms: u64,
        lookback: Duration,
    ) -> Result<Vec<LogEvent>> {
        let lines = self.read_window(since_ms, lookback).await?;
        let events = match_lines(patterns, &lines);
        debug!(
            lines = lines.len(),
            events = events.len(),
            since_ms,
            "scanned log window"
        );
        Ok(events)
    }

    /// The newest `n` raw lines, for diagnostics
    pub async fn tail(&self, n: usize) -> Result<Vec<String>> {
        let raw = self.logs.read_logs(LogQuery::Tail(n)).await?;
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(n);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fakes::FakeLogs;

    const T0: u64 = 1_700_000_000_000;

    fn correlator(logs: &Arc<FakeLogs>) -> LogCorrelator {
        LogCorrelator::new(logs.clone(), 2000)
    }

    #[test]
    fn test_parse_line_timestamp() {
        assert_eq!(
            parse_line_timestamp("1700000000.123  4242  4242 I Tag: hi"),
            Some(1_700_000_000_123)
        );
        assert_eq!(
            parse_line_timestamp("  1700000000.5  1 1 D Tag: hi"),
            Some(1_700_000_000_500)
        );
        assert_eq!(parse_line_timestamp("--------- beginning of main"), None);
        assert_eq!(parse_line_timestamp("\tat com.example.Foo.bar(Foo.kt:12)"), None);
    }

    #[test]
    fn test_oversized_timestamp_is_not_a_timestamp() {
        assert_eq!(parse_line_timestamp("99999999999999999.1  1 1 I App: hi"), None);
        assert_eq!(parse_line_timestamp("99999999999999999999999.1  1 1 I App: hi"), None);

        let raw = "1700000000.100  1  1 I App: first\n99999999999999999.1  1 1 I App: hi";
        let lines = parse_lines(raw);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].timestamp_ms, 1_700_000_000_100);
    }

    #[test]
    fn test_parse_line_source() {
        assert_eq!(
            parse_line_source("1700000000.123  4242  4243 W TranscriptWorker: retrying"),
            Some("TranscriptWorker")
        );
        assert_eq!(parse_line_source("garbage"), None);
    }

    #[test]
    fn test_continuation_lines_inherit_timestamp() {
        let raw = "1700000000.100  1  1 E App: boom\n\tat Foo.bar(Foo.kt:1)\n1700000001.000  1  1 I App: next";
        let lines = parse_lines(raw);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].timestamp_ms, 1_700_000_000_100);
        assert_eq!(lines[1].source, "App");
        assert_eq!(lines[2].timestamp_ms, 1_700_000_001_000);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = Pattern::new("bad", "(unclosed").unwrap_err();
        assert_eq!(err.kind(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_overlapping_patterns_yield_one_event_each() {
        let logs = Arc::new(FakeLogs::new());
        logs.log(T0, "Api", "request req-42 completed status=200");

        let patterns = vec![
            Pattern::new("request", r"request (\S+)").unwrap().extract(1, "request_id"),
            Pattern::new("status", r"status=(\d+)").unwrap().extract(1, "status"),
        ];
        let events = correlator(&logs)
            .find_events(&patterns, T0, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].pattern, "request");
        assert_eq!(events[0].field("request_id"), Some("req-42"));
        assert_eq!(events[1].pattern, "status");
        assert_eq!(events[1].field("status"), Some("200"));
        assert_eq!(events[0].source, "Api");
    }

    #[tokio::test]
    async fn test_events_are_chronological() {
        let logs = Arc::new(FakeLogs::new());
        logs.log(T0 + 10, "Worker", "job started id=1");
        logs.log(T0 + 20, "Worker", "job finished id=1");
        logs.log(T0 + 30, "Worker", "job started id=1");

        let patterns = vec![
            Pattern::new("finished", r"job finished").unwrap(),
            Pattern::new("started", r"job started").unwrap(),
        ];
        let events = correlator(&logs)
            .find_events(&patterns, T0, Duration::ZERO)
            .await
            .unwrap();

        let order: Vec<&str> = events.iter().map(|e| e.pattern.as_str()).collect();
        assert_eq!(order, vec!["started", "finished", "started"]);
        assert!(happened_before(&events, "started", "finished"));
        assert!(!happened_before(&events, "finished", "started"));
        assert_eq!(count(&events, "started"), 2);
    }

    #[tokio::test]
    async fn test_lookback_window() {
        let logs = Arc::new(FakeLogs::new());
        logs.log(T0 - 10_000, "App", "tick old");
        logs.log(T0 - 2_000, "App", "tick recent");
        logs.log(T0 + 1_000, "App", "tick new");

        let patterns = vec![Pattern::new("tick", r"tick (\w+)").unwrap().extract(1, "when")];
        let c = correlator(&logs);

        let strict = c.find_events(&patterns, T0, Duration::ZERO).await.unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].field("when"), Some("new"));

        let wide = c
            .find_events(&patterns, T0, Duration::from_millis(5_000))
            .await
            .unwrap();
        let whens: Vec<&str> = wide.iter().filter_map(|e| e.field("when")).collect();
        assert_eq!(whens, vec!["recent", "new"]);
    }

    #[tokio::test]
    async fn test_max_lines_keeps_newest() {
        let logs = Arc::new(FakeLogs::new());
        for i in 0..5 {
            logs.log(T0 + i, "App", &format!("line {i}"));
        }
        let patterns = vec![Pattern::new("line", r"line (\d)").unwrap().extract(1, "n")];
        let events = LogCorrelator::new(logs.clone(), 2)
            .find_events(&patterns, T0, Duration::ZERO)
            .await
            .unwrap();
        let ns: Vec<&str> = events.iter().filter_map(|e| e.field("n")).collect();
        assert_eq!(ns, vec!["3", "4"]);
    }

    #[tokio::test]
    async fn test_find_correlated() {
        let logs = Arc::new(FakeLogs::new());
        logs.log(T0, "Api", "POST /transcripts id=abc-1");
        logs.log(T0 + 5, "Api", "POST /transcripts id=zzz-9");
        logs.log(T0 + 9, "Worker", "processing abc-1");

        let patterns = vec![
            Pattern::new("post", r"POST \S+ id=(\S+)").unwrap().extract(1, "id"),
            Pattern::new("worker", r"processing").unwrap(),
        ];
        let events = correlator(&logs)
            .find_events(&patterns, T0, Duration::ZERO)
            .await
            .unwrap();

        let hits = find_correlated(&events, "abc-1");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].pattern, "post");
        assert_eq!(hits[1].source, "Worker");
        assert!(find_correlated(&events, "").is_empty());
    }

    #[tokio::test]
    async fn test_tail() {
        let logs = Arc::new(FakeLogs::new());
        logs.log(T0, "App", "a");
        logs.log(T0 + 1, "App", "b");
        let tail = correlator(&logs).tail(1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert!(tail[0].ends_with("App: b"));
    }
}
