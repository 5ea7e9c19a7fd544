//! External collaborators
//!
//! The harness core never talks to a device, a log buffer, or a backend
//! directly. Everything it observes or triggers goes through the traits in
//! this module, so the same journeys run against adb, an emulator farm, or
//! the in-memory fakes used by tests.

pub mod adb;
pub mod clock;
pub mod fakes;
pub mod http;
pub mod shell;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::Result;
use crate::diagnostics::ArtifactSink;

pub use adb::AdbDevice;
pub use clock::{Clock, ManualClock, SystemClock};
pub use http::ReqwestHttpClient;
pub use shell::ShellRunner;

/// Output of a host or device command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command and reports its exit status
///
/// A non-zero exit is returned as a value. `Err` is reserved for commands
/// that could not be started or did not finish in time.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput>;
}

/// Produces the serialized UI tree of the visible screen
#[async_trait]
pub trait UiDumper: Send + Sync {
    async fn dump_ui(&self) -> Result<String>;
}

/// Which part of the log buffer to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogQuery {
    /// Lines logged at or after this instant (ms since the Unix epoch)
    Since(u64),
    /// The last N lines
    Tail(usize),
}

/// Reads the device log buffer
#[async_trait]
pub trait LogReader: Send + Sync {
    async fn read_logs(&self, query: LogQuery) -> Result<String>;
}

/// A backend call made directly from a journey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON, if it is JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Every external collaborator a run needs, shared by all journeys
#[derive(Clone)]
pub struct Collaborators {
    pub commands: Arc<dyn CommandRunner>,
    pub ui: Arc<dyn UiDumper>,
    pub logs: Arc<dyn LogReader>,
    pub http: Arc<dyn HttpClient>,
    pub sink: Arc<dyn ArtifactSink>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
