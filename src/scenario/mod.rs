//! Declarative journeys
//!
//! Scenario files describe journeys as YAML step lists (device actions,
//! backend calls, UI and log waits) and are compiled into ordinary
//! [`Journey`] values for the orchestrator.

pub mod config;
mod runner;
mod template;

use std::path::Path;

pub use config::{JourneySpec, ScenarioFile, StepAction, StepSpec, UiCondition};
pub use runner::build_journeys;
pub use template::Vars;

use crate::common::Result;
use crate::journey::Journey;

/// Load a scenario file and build its journeys
pub fn load_journeys(path: &Path) -> Result<Vec<Journey>> {
    let scenario = ScenarioFile::load(path)?;
    Ok(build_journeys(&scenario))
}
