//! Failure diagnostics
//!
//! When a step or journey fails, the harness persists what the device looked
//! like at that moment (the parsed snapshot, the raw UI dump and the log tail)
//! through an [`ArtifactSink`]. Capturing never fails the run: collaborator
//! errors are recorded inside the bundle instead.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::common::config::LogConfig;
use crate::common::paths::slug;
use crate::common::{Error, Result};
use crate::correlator::LogCorrelator;
use crate::device::{Clock, Collaborators};
use crate::snapshot::{Snapshot, SnapshotSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    FailureBundle,
    Report,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailureBundle => "failure",
            Self::Report => "report",
        }
    }
}

/// Where a persisted artifact can be found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub label: String,
    pub location: String,
}

/// Persists diagnostic payloads
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(
        &self,
        kind: ArtifactKind,
        label: &str,
        payload: &serde_json::Value,
    ) -> Result<ArtifactRef>;
}

/// Writes each artifact as a pretty JSON file in one directory
///
/// Files are named `<seq>-<kind>-<label>.json` so a directory listing reads
/// in capture order.
pub struct FsArtifactSink {
    dir: PathBuf,
    seq: AtomicUsize,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn persist(
        &self,
        kind: ArtifactKind,
        label: &str,
        payload: &serde_json::Value,
    ) -> Result<ArtifactRef> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self
            .dir
            .join(format!("{:03}-{}-{}.json", seq, kind.as_str(), slug(label)));
        let bytes = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
        Ok(ArtifactRef {
            kind,
            label: label.to_string(),
            location: path.display().to_string(),
        })
    }
}

/// Keeps artifacts in memory (tests, dry runs)
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(ArtifactRef, serde_json::Value)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn payload(&self, location: &str) -> Option<serde_json::Value> {
        self.lock()
            .iter()
            .find(|(r, _)| r.location == location)
            .map(|(_, p)| p.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ArtifactRef, serde_json::Value)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn persist(
        &self,
        kind: ArtifactKind,
        label: &str,
        payload: &serde_json::Value,
    ) -> Result<ArtifactRef> {
        let mut entries = self.lock();
        let artifact = ArtifactRef {
            kind,
            label: label.to_string(),
            location: format!("memory://{}", entries.len() + 1),
        };
        entries.push((artifact.clone(), payload.clone()));
        Ok(artifact)
    }
}

/// Everything captured at the moment of a failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureBundle {
    pub label: String,
    pub captured_at_ms: u64,
    pub reason: Option<String>,
    pub snapshot: Option<Snapshot>,
    pub raw_dump: Option<String>,
    pub log_tail: Vec<String>,
    /// Collaborator failures hit while capturing
    pub capture_errors: Vec<String>,
}

/// Captures and persists failure bundles
#[derive(Clone)]
pub struct Diagnostics {
    snapshots: SnapshotSource,
    logs: LogCorrelator,
    sink: Arc<dyn ArtifactSink>,
    clock: Arc<dyn Clock>,
    tail_lines: usize,
}

impl Diagnostics {
    pub fn new(collaborators: &Collaborators, config: &LogConfig) -> Self {
        Self {
            snapshots: SnapshotSource::new(collaborators.ui.clone(), collaborators.clock.clone()),
            logs: LogCorrelator::from_config(collaborators.logs.clone(), config),
            sink: collaborators.sink.clone(),
            clock: collaborators.clock.clone(),
            tail_lines: config.tail_lines,
        }
    }

    /// Gather the current UI and log tail without persisting
    pub async fn collect(&self, label: &str, reason: Option<&str>) -> FailureBundle {
        let mut capture_errors = Vec::new();

        let (snapshot, raw_dump) = match self.snapshots.capture_raw().await {
            Ok(capture) => (Some(capture.snapshot), Some(capture.raw)),
            Err(e) => {
                capture_errors.push(format!("ui dump: {e}"));
                (None, None)
            }
        };

        let log_tail = match self.logs.tail(self.tail_lines).await {
            Ok(lines) => lines,
            Err(e) => {
                capture_errors.push(format!("log tail: {e}"));
                Vec::new()
            }
        };

        FailureBundle {
            label: label.to_string(),
            captured_at_ms: self.clock.now_ms(),
            reason: reason.map(str::to_string),
            snapshot,
            raw_dump,
            log_tail,
            capture_errors,
        }
    }

    /// Capture and persist a failure bundle
    ///
    /// Returns `None` only when the sink itself fails; that failure is
    /// logged and otherwise swallowed so the original failure stays the one
    /// reported.
    pub async fn capture(&self, label: &str, reason: Option<&str>) -> Option<ArtifactRef> {
        let bundle = self.collect(label, reason).await;
        let payload = match serde_json::to_value(&bundle) {
            Ok(payload) => payload,
            Err(e) => {
                error!(label, error = %e, "failed to serialize failure bundle");
                return None;
            }
        };
        match self
            .sink
            .persist(ArtifactKind::FailureBundle, label, &payload)
            .await
        {
            Ok(artifact) => {
                info!(label, location = %artifact.location, "captured failure diagnostics");
                Some(artifact)
            }
            Err(e) => {
                error!(label, error = %e, "failed to persist failure diagnostics");
                None
            }
        }
    }
}
