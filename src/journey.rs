//! Journeys and steps
//!
//! A [`Journey`] is an ordered list of named steps. Steps run strictly in
//! sequence; the first one that fails (or returns `Err`) ends the journey,
//! and the results of every step run so far are kept.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::correlator::{LogCorrelator, LogEvent, Pattern};
use crate::device::{Clock, Collaborators, CommandOutput, HttpRequest, HttpResponse};
use crate::diagnostics::{ArtifactRef, Diagnostics};
use crate::poller::{Outcome, Poller, Predicate, WaitKind, WaitSpec};
use crate::snapshot::{Snapshot, SnapshotSource};

/// Error recorded on a failed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Stable code from [`Error::kind`]
    pub kind: String,
    pub message: String,
}

impl From<&Error> for StepError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// What a step reports back
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub success: bool,
    pub detail: String,
    pub error: Option<StepError>,
    pub warnings: Vec<String>,
    pub artifact: Option<ArtifactRef>,
}

impl StepOutcome {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            ..Default::default()
        }
    }

    pub fn fail(detail: impl Into<String>, err: &Error) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            error: Some(err.into()),
            ..Default::default()
        }
    }

    /// Passing outcome carrying a warning
    pub fn warn(detail: impl Into<String>, warning: impl Into<String>) -> Self {
        Self::pass(detail).with_warning(warning)
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Option<ArtifactRef>) -> Self {
        self.artifact = artifact;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub detail: String,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyResult {
    pub journey_name: String,
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_artifact: Option<ArtifactRef>,
}

impl JourneyResult {
    /// The step that ended the journey, if it failed
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.success)
    }

    pub fn warning_count(&self) -> usize {
        self.steps.iter().map(|s| s.warnings.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for JourneyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Body of a step
pub type StepFn = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<StepOutcome>> + Send + Sync>;

#[derive(Clone)]
pub struct Step {
    pub name: String,
    run: StepFn,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish_non_exhaustive()
    }
}

/// An ordered sequence of steps for one user-visible scenario
#[derive(Debug, Clone)]
pub struct Journey {
    name: String,
    description: Option<String>,
    steps: Vec<Step>,
    state: JourneyState,
}

impl Journey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            state: JourneyState::Pending,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a step
    pub fn step<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutcome>> + Send + 'static,
    {
        self.push_step(name, f);
        self
    }

    pub fn push_step<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutcome>> + Send + 'static,
    {
        let run: StepFn = Arc::new(move |ctx| Box::pin(f(ctx)));
        self.steps.push(Step {
            name: name.into(),
            run,
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn state(&self) -> JourneyState {
        self.state
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(&mut self, ctx: &StepContext) -> JourneyResult {
        let span = info_span!("journey", name = %self.name);
        self.state = JourneyState::Running;
        let result = self.run_steps(ctx).instrument(span).await;
        self.state = if result.success {
            JourneyState::Succeeded
        } else {
            JourneyState::Failed
        };
        result
    }

    async fn run_steps(&self, ctx: &StepContext) -> JourneyResult {
        let ctx = ctx.for_journey(&self.name);
        let started = ctx.now_ms();
        let mut steps = Vec::with_capacity(self.steps.len());
        info!(steps = self.steps.len(), "journey started");

        for step in &self.steps {
            let result = run_step(step, &ctx)
                .instrument(info_span!("step", name = %step.name))
                .await;
            let failed = !result.success;
            steps.push(result);
            if failed {
                break;
            }
        }

        let success = steps.iter().all(|s| s.success);
        let failure_artifact = steps
            .iter()
            .find(|s| !s.success)
            .and_then(|s| s.artifact.clone());
        let elapsed_ms = ctx.now_ms().saturating_sub(started);
        if success {
            info!(elapsed_ms, "journey succeeded");
        } else {
            error!(elapsed_ms, "journey failed");
        }

        JourneyResult {
            journey_name: self.name.clone(),
            success,
            steps,
            elapsed_ms,
            failure_artifact,
        }
    }
}

async fn run_step(step: &Step, ctx: &StepContext) -> StepResult {
    let started = ctx.now_ms();
    let outcome = match (step.run)(ctx.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => StepOutcome::fail(format!("step raised an error: {e}"), &e),
    };
    let elapsed_ms = ctx.now_ms().saturating_sub(started);

    if outcome.success {
        for warning in &outcome.warnings {
            warn!(warning = %warning, "step passed with warning");
        }
        info!(elapsed_ms, detail = %outcome.detail, "step passed");
    } else {
        error!(elapsed_ms, detail = %outcome.detail, "step failed");
    }

    StepResult {
        step_name: step.name.clone(),
        success: outcome.success,
        detail: outcome.detail,
        elapsed_ms,
        error: outcome.error,
        warnings: outcome.warnings,
        artifact: outcome.artifact,
    }
}

/// Everything a step may use, cheap to clone
#[derive(Clone)]
pub struct StepContext {
    pub collaborators: Collaborators,
    pub config: Arc<Config>,
    pub cancel: CancellationToken,
    journey: String,
}

impl StepContext {
    pub fn new(collaborators: Collaborators, config: Config) -> Self {
        Self {
            collaborators,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            journey: String::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn for_journey(&self, name: &str) -> Self {
        let mut ctx = self.clone();
        ctx.journey = name.to_string();
        ctx
    }

    /// Name of the journey being run
    pub fn journey(&self) -> &str {
        &self.journey
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.collaborators.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.collaborators.clock.now_ms()
    }

    pub fn snapshots(&self) -> SnapshotSource {
        SnapshotSource::new(
            self.collaborators.ui.clone(),
            self.collaborators.clock.clone(),
        )
    }

    pub async fn capture(&self) -> Result<Snapshot> {
        self.snapshots().capture().await
    }

    pub fn poller(&self) -> Poller {
        Poller::new(self.collaborators.clock.clone())
    }

    /// A wait spec preloaded with the configured timeout and interval
    pub fn wait_spec<T>(
        &self,
        kind: WaitKind,
        description: impl Into<String>,
        predicate: Predicate<T>,
    ) -> WaitSpec<T> {
        WaitSpec::new(kind, description, predicate).with_defaults(&self.config.poller)
    }

    /// Poll the UI until `spec` holds
    pub async fn wait_ui(
        &self,
        spec: &WaitSpec<Snapshot>,
        baseline: Option<Snapshot>,
    ) -> Result<Outcome<Snapshot>> {
        let source = self.snapshots();
        let sample = move || {
            let source = source.clone();
            async move { source.capture().await }
        };
        self.poller()
            .wait_for(spec, baseline, sample, &self.cancel)
            .await
    }

    pub fn correlator(&self) -> LogCorrelator {
        LogCorrelator::from_config(self.collaborators.logs.clone(), &self.config.logs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_millis(self.config.logs.lookback_ms)
    }

    /// Events since `since_ms`, widened by the configured lookback
    pub async fn find_events(&self, patterns: &[Pattern], since_ms: u64) -> Result<Vec<LogEvent>> {
        self.correlator()
            .find_events(patterns, since_ms, self.lookback())
            .await
    }

    /// Poll the log buffer until `spec` holds for the matched events
    pub async fn wait_log(
        &self,
        spec: &WaitSpec<Vec<LogEvent>>,
        patterns: &[Pattern],
        since_ms: u64,
    ) -> Result<Outcome<Vec<LogEvent>>> {
        let correlator = self.correlator();
        let patterns = patterns.to_vec();
        let lookback = self.lookback();
        let sample = move || {
            let correlator = correlator.clone();
            let patterns = patterns.clone();
            async move { correlator.find_events(&patterns, since_ms, lookback).await }
        };
        self.poller()
            .wait_for(spec, Some(Vec::new()), sample, &self.cancel)
            .await
    }

    pub async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.collaborators.commands.exec(command).await
    }

    pub async fn http(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.collaborators.http.request(request).await
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(&self.collaborators, &self.config.logs)
    }

    /// Persist a failure bundle labelled with the journey name
    pub async fn capture_failure(&self, label: &str, reason: Option<&str>) -> Option<ArtifactRef> {
        let label = if self.journey.is_empty() {
            label.to_string()
        } else {
            format!("{}-{}", self.journey, label)
        };
        self.diagnostics().capture(&label, reason).await
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("journey", &self.journey)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fakes::FakeDevice;
    use crate::snapshot::predicates;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(device: &FakeDevice) -> StepContext {
        StepContext::new(device.collaborators(), Config::default())
    }

    fn counted(counter: &Arc<AtomicUsize>, success: bool) -> impl Fn(StepContext) -> BoxFuture<'static, Result<StepOutcome>> + Send + Sync + 'static {
        let counter = counter.clone();
        move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(if success {
                    StepOutcome::pass("ok")
                } else {
                    StepOutcome::fail("nope", &Error::step_failed("s", "nope"))
                })
            })
        }
    }

    #[tokio::test]
    async fn test_failing_step_stops_journey() {
        let device = FakeDevice::new();
        let calls: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let mut journey = Journey::new("j")
            .step("S1", counted(&calls[0], true))
            .step("S2", counted(&calls[1], false))
            .step("S3", counted(&calls[2], true));
        assert_eq!(journey.state(), JourneyState::Pending);

        let result = journey.run(&context(&device)).await;

        assert!(!result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].step_name, "S1");
        assert_eq!(result.steps[1].step_name, "S2");
        assert_eq!(calls[2].load(Ordering::SeqCst), 0);
        assert_eq!(result.failed_step().unwrap().step_name, "S2");
        assert_eq!(journey.state(), JourneyState::Failed);
    }

    #[tokio::test]
    async fn test_step_error_counts_as_failure() {
        let device = FakeDevice::new();
        let mut journey = Journey::new("j")
            .step("boom", |_ctx| async {
                Err::<StepOutcome, _>(Error::Internal("exploded".into()))
            })
            .step("never", |_ctx| async { Ok(StepOutcome::pass("unreachable")) });

        let result = journey.run(&context(&device)).await;

        assert!(!result.success);
        assert_eq!(result.steps.len(), 1);
        let err = result.steps[0].error.as_ref().unwrap();
        assert_eq!(err.kind, "INTERNAL_ERROR");
        assert!(err.message.contains("exploded"));
    }

    #[tokio::test]
    async fn test_successful_journey_keeps_warnings_and_timing() {
        let device = FakeDevice::new();
        let mut journey = Journey::new("j")
            .step("wait a bit", |ctx: StepContext| async move {
                ctx.clock().sleep(Duration::from_millis(250)).await;
                Ok(StepOutcome::warn("done", "backend returned 404"))
            })
            .step("second", |_ctx| async { Ok(StepOutcome::pass("ok")) });

        let result = journey.run(&context(&device)).await;

        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].elapsed_ms, 250);
        assert_eq!(result.elapsed_ms, 250);
        assert_eq!(result.warning_count(), 1);
        assert!(result.failure_artifact.is_none());
        assert_eq!(journey.state(), JourneyState::Succeeded);
    }

    #[tokio::test]
    async fn test_step_can_request_failure_capture() {
        let device = FakeDevice::new();
        device
            .ui
            .push(r#"<hierarchy><node resource-id="p:id/error" class="T"/></hierarchy>"#);
        let mut journey = Journey::new("upload").step("submit", |ctx: StepContext| async move {
            let artifact = ctx.capture_failure("submit", Some("no result")).await;
            Ok(StepOutcome::fail("no result", &Error::step_failed("submit", "no result"))
                .with_artifact(artifact))
        });

        let result = journey.run(&context(&device)).await;

        let artifact = result.failure_artifact.unwrap();
        assert_eq!(artifact.label, "upload-submit");
        assert_eq!(device.sink.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_ui_through_context() {
        let device = FakeDevice::new();
        device
            .ui
            .push(r#"<hierarchy><node resource-id="p:id/spinner" class="P"/></hierarchy>"#);
        device
            .ui
            .push(r#"<hierarchy><node resource-id="p:id/result" text="ok" class="T"/></hierarchy>"#);
        let ctx = context(&device);

        let spec = ctx.wait_spec(
            WaitKind::ElementPresent,
            "result shown",
            predicates::element_present("result"),
        );
        let outcome = ctx.wait_ui(&spec, None).await.unwrap();

        assert!(outcome.is_reached());
        assert_eq!(outcome.elapsed_ms(), 1_000);
        assert_eq!(outcome.value().unwrap().text_of("result"), Some("ok"));
    }

    #[tokio::test]
    async fn test_wait_log_through_context() {
        let device = FakeDevice::new();
        let ctx = context(&device);
        let since = device.now_ms();
        device.logs.log(since + 10, "Worker", "upload done id=7");

        let patterns = vec![Pattern::new("done", r"upload done id=(\d+)").unwrap().extract(1, "id")];
        let spec = ctx.wait_spec(
            WaitKind::LogEvent,
            "upload logged",
            crate::poller::predicate(|_, events: &Vec<LogEvent>, _| !events.is_empty()),
        );
        let outcome = ctx.wait_log(&spec, &patterns, since).await.unwrap();

        assert!(outcome.is_reached());
        assert_eq!(outcome.value().unwrap()[0].field("id"), Some("7"));
    }
}
