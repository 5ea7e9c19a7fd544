//! Orchestrator
//!
//! Holds registered journeys and runs them in registration order with a
//! fail-fast policy: the first failing journey stops the run, gets a
//! diagnostics capture, and surfaces as [`Error::OrchestratorAbort`]
//! carrying the partial report.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::device::Collaborators;
use crate::journey::{Journey, JourneyResult, StepContext};
use crate::report::Report;

pub struct Orchestrator {
    journeys: Vec<Journey>,
    ctx: StepContext,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: Config) -> Self {
        Self {
            journeys: Vec::new(),
            ctx: StepContext::new(collaborators, config),
        }
    }

    /// Token cancelling every wait of the run
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.ctx = self.ctx.with_cancel(cancel);
        self
    }

    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    /// Register a journey
    ///
    /// A journey with the same name replaces the earlier one in its
    /// original position.
    pub fn register(&mut self, journey: Journey) {
        match self
            .journeys
            .iter()
            .position(|j| j.name() == journey.name())
        {
            Some(index) => {
                info!(journey = %journey.name(), "replacing registered journey");
                self.journeys[index] = journey;
            }
            None => self.journeys.push(journey),
        }
    }

    pub fn journey_names(&self) -> Vec<&str> {
        self.journeys.iter().map(Journey::name).collect()
    }

    pub fn len(&self) -> usize {
        self.journeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journeys.is_empty()
    }

    /// Run every journey in order
    ///
    /// Returns the full report when all pass. On the first failure no
    /// further journey is started and the partial report travels inside
    /// the error.
    pub async fn run_all(&mut self) -> Result<Report> {
        let started = self.ctx.now_ms();
        let registered = self.journeys.len();
        let mut results = Vec::with_capacity(registered);
        info!(journeys = registered, "run started");

        for journey in self.journeys.iter_mut() {
            let mut result = journey.run(&self.ctx).await;
            if result.success {
                results.push(result);
                continue;
            }

            let name = result.journey_name.clone();
            attach_diagnostics(&self.ctx, &mut result).await;
            results.push(result);

            let elapsed_ms = self.ctx.now_ms().saturating_sub(started);
            let report = Report::new(registered, results, Some(name.clone()), elapsed_ms);
            error!(journey = %name, attempted = report.total, registered, "run aborted");
            return Err(Error::OrchestratorAbort {
                journey: name,
                report: Box::new(report),
            });
        }

        let elapsed_ms = self.ctx.now_ms().saturating_sub(started);
        let report = Report::new(registered, results, None, elapsed_ms);
        info!(passed = report.passed, elapsed_ms, "run finished");
        Ok(report)
    }

    /// Run a single registered journey by name
    ///
    /// A failure is returned as a value (with diagnostics attached), not as
    /// an abort.
    pub async fn run_one(&mut self, name: &str) -> Result<JourneyResult> {
        let journey = self
            .journeys
            .iter_mut()
            .find(|j| j.name() == name)
            .ok_or_else(|| Error::JourneyNotFound(name.to_string()))?;
        let mut result = journey.run(&self.ctx).await;
        if !result.success {
            attach_diagnostics(&self.ctx, &mut result).await;
        }
        Ok(result)
    }
}

/// Capture a failure bundle unless the failing step already did
async fn attach_diagnostics(ctx: &StepContext, result: &mut JourneyResult) {
    if result.failure_artifact.is_some() {
        return;
    }
    let reason = result
        .failed_step()
        .map(|s| format!("step '{}' failed: {}", s.step_name, s.detail));
    result.failure_artifact = ctx
        .diagnostics()
        .capture(&result.journey_name, reason.as_deref())
        .await;
}
