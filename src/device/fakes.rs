//! In-memory collaborators for tests and dry runs
//!
//! Each fake records what it was asked and replays scripted answers, so a
//! journey can be exercised end to end without a device or backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    Clock, Collaborators, CommandOutput, CommandRunner, HttpClient, HttpRequest, HttpResponse,
    LogQuery, LogReader, ManualClock, UiDumper,
};
use crate::common::{Error, Result};
use crate::correlator::parse_line_timestamp;
use crate::diagnostics::MemorySink;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records every command and answers from a queue (default: empty success)
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<CommandOutput>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, output: CommandOutput) {
        lock(&self.responses).push_back(output);
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        lock(&self.commands).push(command.to_string());
        Ok(lock(&self.responses).pop_front().unwrap_or_default())
    }
}

/// Replays a script of UI dumps; the last entry repeats forever
#[derive(Default)]
pub struct ScriptedUi {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: Mutex<usize>,
}

impl ScriptedUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, dump: impl Into<String>) {
        lock(&self.script).push_back(Ok(dump.into()));
    }

    /// Queue a failed dump (surfaces as a transient observation error)
    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.script).push_back(Err(message.into()));
    }

    /// Replace the whole script with a single repeating dump
    pub fn set(&self, dump: impl Into<String>) {
        let mut script = lock(&self.script);
        script.clear();
        script.push_back(Ok(dump.into()));
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl UiDumper for ScriptedUi {
    async fn dump_ui(&self) -> Result<String> {
        *lock(&self.calls) += 1;
        let mut script = lock(&self.script);
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match next {
            Some(Ok(dump)) => Ok(dump),
            Some(Err(message)) => Err(Error::TransientObservation(message)),
            None => Ok(String::new()),
        }
    }
}

/// Append-only log buffer in `logcat -v epoch` format
#[derive(Default)]
pub struct FakeLogs {
    lines: Mutex<Vec<(u64, String)>>,
}

impl FakeLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line stamped at `timestamp_ms`
    pub fn log(&self, timestamp_ms: u64, tag: &str, message: &str) {
        let line = format!(
            "{:>10}.{:03}  4242  4242 I {}: {}",
            timestamp_ms / 1000,
            timestamp_ms % 1000,
            tag,
            message
        );
        lock(&self.lines).push((timestamp_ms, line));
    }

    /// Append a raw line; unstamped lines inherit the previous timestamp
    pub fn push_raw(&self, line: &str) {
        let mut lines = lock(&self.lines);
        let ts = parse_line_timestamp(line)
            .or_else(|| lines.last().map(|(ts, _)| *ts))
            .unwrap_or(0);
        lines.push((ts, line.to_string()));
    }

    pub fn clear(&self) {
        lock(&self.lines).clear();
    }
}

#[async_trait]
impl LogReader for FakeLogs {
    async fn read_logs(&self, query: LogQuery) -> Result<String> {
        let lines = lock(&self.lines);
        let selected: Vec<&str> = match query {
            LogQuery::Since(since) => lines
                .iter()
                .filter(|(ts, _)| *ts >= since)
                .map(|(_, l)| l.as_str())
                .collect(),
            LogQuery::Tail(n) => {
                let skip = lines.len().saturating_sub(n);
                lines.iter().skip(skip).map(|(_, l)| l.as_str()).collect()
            }
        };
        Ok(selected.join("\n"))
    }
}

/// Answers requests from a route table (default 404) and records them
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<Vec<(String, String, HttpResponse)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, method: &str, url: &str, status: u16, body: &str) {
        lock(&self.routes).push((
            method.to_ascii_uppercase(),
            url.to_string(),
            HttpResponse {
                status,
                body: body.to_string(),
            },
        ));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        lock(&self.requests).push(request.clone());
        let routes = lock(&self.routes);
        let found = routes
            .iter()
            .rev()
            .find(|(method, url, _)| *method == request.method && *url == request.url)
            .map(|(_, _, response)| response.clone());
        Ok(found.unwrap_or(HttpResponse {
            status: 404,
            body: String::new(),
        }))
    }
}

/// A complete fake environment with handles to every collaborator
#[derive(Clone)]
pub struct FakeDevice {
    pub clock: ManualClock,
    pub runner: Arc<RecordingRunner>,
    pub ui: Arc<ScriptedUi>,
    pub logs: Arc<FakeLogs>,
    pub http: Arc<FakeHttp>,
    pub sink: Arc<MemorySink>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            clock: ManualClock::default(),
            runner: Arc::new(RecordingRunner::new()),
            ui: Arc::new(ScriptedUi::new()),
            logs: Arc::new(FakeLogs::new()),
            http: Arc::new(FakeHttp::new()),
            sink: Arc::new(MemorySink::new()),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            commands: self.runner.clone(),
            ui: self.ui.clone(),
            logs: self.logs.clone(),
            http: self.http.clone(),
            sink: self.sink.clone(),
            clock: Arc::new(self.clock.clone()),
        }
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_ui_repeats_last() {
        let ui = ScriptedUi::new();
        ui.push("a");
        ui.push_error("adb hiccup");
        ui.push("b");

        assert_eq!(ui.dump_ui().await.unwrap(), "a");
        assert!(ui.dump_ui().await.is_err());
        assert_eq!(ui.dump_ui().await.unwrap(), "b");
        assert_eq!(ui.dump_ui().await.unwrap(), "b");
        assert_eq!(ui.calls(), 4);
    }

    #[tokio::test]
    async fn test_fake_logs_since_and_tail() {
        let logs = FakeLogs::new();
        logs.log(1_000, "App", "one");
        logs.log(2_000, "App", "two");
        logs.log(3_000, "App", "three");

        let since = logs.read_logs(LogQuery::Since(2_000)).await.unwrap();
        assert_eq!(since.lines().count(), 2);
        let tail = logs.read_logs(LogQuery::Tail(1)).await.unwrap();
        assert!(tail.ends_with("App: three"));
    }

    #[tokio::test]
    async fn test_fake_http_routes() {
        let http = FakeHttp::new();
        http.route("get", "/health", 200, "ok");

        let ok = http.request(&HttpRequest::new("GET", "/health")).await.unwrap();
        assert_eq!(ok.status, 200);
        let missing = http.request(&HttpRequest::new("GET", "/nope")).await.unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(http.requests().len(), 2);
    }
}
