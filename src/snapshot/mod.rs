//! UI state snapshots
//!
//! Captures the visible screen through the UI dump collaborator, parses it
//! into a typed [`Snapshot`], and compares snapshots with [`diff`].

mod diff;
mod parser;
pub mod predicates;
mod types;

use std::sync::Arc;

use tracing::debug;

pub use diff::{diff, CountChange, Field, FieldChange, StateDelta};
pub use parser::parse_hierarchy;
pub use types::{ElementState, Rect, Snapshot};

use crate::common::Result;
use crate::device::{Clock, UiDumper};

/// A snapshot together with the dump it was parsed from
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub raw: String,
    pub snapshot: Snapshot,
}

/// Captures snapshots on demand
#[derive(Clone)]
pub struct SnapshotSource {
    ui: Arc<dyn UiDumper>,
    clock: Arc<dyn Clock>,
}

impl SnapshotSource {
    pub fn new(ui: Arc<dyn UiDumper>, clock: Arc<dyn Clock>) -> Self {
        Self { ui, clock }
    }

    /// Dump and parse the current screen
    ///
    /// An unparseable dump is an empty snapshot, not an error. `Err` means
    /// the dump itself could not be taken (device offline, adb timeout) and
    /// is treated as transient by the poller.
    pub async fn capture(&self) -> Result<Snapshot> {
        Ok(self.capture_raw().await?.snapshot)
    }

    /// Like [`capture`](Self::capture) but keeps the raw dump for artifacts
    pub async fn capture_raw(&self) -> Result<RawCapture> {
        let raw = self.ui.dump_ui().await?;
        let snapshot = parse_hierarchy(&raw, self.clock.now_ms());
        debug!(summary = %snapshot.summary(), "captured snapshot");
        Ok(RawCapture { raw, snapshot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fakes::ScriptedUi;
    use crate::device::ManualClock;

    #[tokio::test]
    async fn test_capture_stamps_with_clock() {
        let ui = Arc::new(ScriptedUi::new());
        ui.push(r#"<hierarchy><node resource-id="p:id/a" class="V"/></hierarchy>"#);
        let clock = ManualClock::new(5_000);
        let source = SnapshotSource::new(ui, Arc::new(clock));

        let snap = source.capture().await.unwrap();
        assert_eq!(snap.timestamp_ms(), 5_000);
        assert!(snap.is_present("a"));
    }

    #[tokio::test]
    async fn test_malformed_dump_never_errors() {
        let ui = Arc::new(ScriptedUi::new());
        ui.push("ERROR: null root node returned by UiTestAutomationBridge.");
        let source = SnapshotSource::new(ui, Arc::new(ManualClock::default()));

        let snap = source.capture().await.unwrap();
        assert_eq!(snap.element_count(), 0);
    }

    #[tokio::test]
    async fn test_dump_failure_is_transient_error() {
        let ui = Arc::new(ScriptedUi::new());
        ui.push_error("device offline");
        let source = SnapshotSource::new(ui, Arc::new(ManualClock::default()));

        let err = source.capture().await.unwrap_err();
        assert!(err.is_transient());
    }
}
