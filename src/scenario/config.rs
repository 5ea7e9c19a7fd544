//! Scenario file types
//!
//! Defines the data structures for deserializing YAML journey scenarios.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};

/// A scenario file: shared variables plus an ordered list of journeys
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioFile {
    /// Variables available to every journey as `${name}`
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    pub journeys: Vec<JourneySpec>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JourneySpec {
    pub name: String,
    pub description: Option<String>,
    /// Journey-level variables, overriding file-level ones
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    pub steps: Vec<StepSpec>,
}

/// One step: an optional display name plus the action to perform
#[derive(Deserialize, Debug, Clone)]
pub struct StepSpec {
    pub name: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl StepSpec {
    /// Explicit name, else a short description of the action
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.action {
            StepAction::Shell { command, .. } => format!("shell {command}"),
            StepAction::Launch { component, .. } => format!("launch {component}"),
            StepAction::Tap { tag, text, x, y } => match (tag, text, x, y) {
                (Some(tag), _, _, _) => format!("tap {tag}"),
                (None, Some(text), _, _) => format!("tap '{text}'"),
                (None, None, Some(x), Some(y)) => format!("tap {x},{y}"),
                _ => "tap".to_string(),
            },
            StepAction::Input { .. } => "input text".to_string(),
            StepAction::Key { key } => format!("key {key}"),
            StepAction::ClearLogs => "clear logs".to_string(),
            StepAction::Sleep { ms } => format!("sleep {ms} ms"),
            StepAction::Http { method, url, .. } => format!("{} {}", method.to_uppercase(), url),
            StepAction::WaitUi { condition, tag, .. } => match tag {
                Some(tag) => format!("wait {condition} {tag}"),
                None => format!("wait {condition}"),
            },
            StepAction::WaitLog { pattern, .. } => format!("wait log /{pattern}/"),
        }
    }
}

/// The action a step performs
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Run a command on the host, or on the device with `device: true`
    Shell {
        command: String,
        #[serde(default)]
        device: bool,
        /// Required exit code (default 0)
        #[serde(default)]
        expect_exit: i32,
        /// Substring required in stdout
        output_contains: Option<String>,
    },
    /// Start an activity (`package/.Activity`)
    Launch {
        component: String,
        /// Force-stop the package first
        #[serde(default)]
        fresh: bool,
    },
    /// Tap an element by tag, else by visible text, else by coordinates
    Tap {
        tag: Option<String>,
        text: Option<String>,
        x: Option<i32>,
        y: Option<i32>,
    },
    /// Type into the focused field
    Input { text: String },
    /// Send a key event (`KEYCODE_BACK`, `66`, ...)
    Key { key: String },
    ClearLogs,
    Sleep { ms: u64 },
    /// Call the backend directly
    Http {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        body: Option<String>,
        /// Statuses that pass (default: any 2xx)
        #[serde(default)]
        expect_status: Vec<u16>,
        /// Statuses tolerated with a warning (environment limitations)
        #[serde(default)]
        accept_status: Vec<u16>,
        /// Variable name to JSON pointer into the response body
        #[serde(default)]
        capture: BTreeMap<String, String>,
    },
    /// Poll the UI until a condition holds
    WaitUi {
        condition: UiCondition,
        tag: Option<String>,
        text: Option<String>,
        timeout_ms: Option<u64>,
        poll_interval_ms: Option<u64>,
        #[serde(default = "default_critical")]
        critical: bool,
    },
    /// Poll the log buffer until a pattern has matched
    WaitLog {
        pattern: String,
        /// Field name to capture group; captured fields become variables
        #[serde(default)]
        extract: BTreeMap<String, usize>,
        /// Only count events mentioning this id
        correlation: Option<String>,
        #[serde(default = "default_min_count")]
        min_count: usize,
        /// More matches than this is a failure (duplicate side effect)
        max_count: Option<usize>,
        /// With `max_count`: how long to keep watching for duplicates after
        /// the first match (default: the rest of the timeout)
        settle_ms: Option<u64>,
        timeout_ms: Option<u64>,
        poll_interval_ms: Option<u64>,
        #[serde(default = "default_critical")]
        critical: bool,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_critical() -> bool {
    true
}

fn default_min_count() -> usize {
    1
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UiCondition {
    Present,
    Absent,
    /// Element text equals `text`, or any visible text contains it without a tag
    Text,
    /// Element text contains `text`
    TextContains,
    Enabled,
    /// Anything changed, or the element changed when a tag is given
    Changed,
}

impl std::fmt::Display for UiCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Text => "text",
            Self::TextContains => "text contains",
            Self::Enabled => "enabled",
            Self::Changed => "changed",
        };
        f.write_str(name)
    }
}

impl ScenarioFile {
    /// Load and validate a scenario file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Scenario(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject steps that could never run
    pub fn validate(&self) -> Result<()> {
        if self.journeys.is_empty() {
            return Err(Error::Scenario("no journeys defined".to_string()));
        }
        for journey in &self.journeys {
            if journey.steps.is_empty() {
                return Err(Error::Scenario(format!(
                    "journey '{}' has no steps",
                    journey.name
                )));
            }
            for step in &journey.steps {
                validate_step(step).map_err(|reason| {
                    Error::Scenario(format!(
                        "journey '{}', step '{}': {}",
                        journey.name,
                        step.display_name(),
                        reason
                    ))
                })?;
            }
        }
        Ok(())
    }
}

fn validate_step(step: &StepSpec) -> std::result::Result<(), String> {
    match &step.action {
        StepAction::Tap { tag, text, x, y } => {
            let coords = x.is_some() && y.is_some();
            if tag.is_none() && text.is_none() && !coords {
                return Err("tap needs a tag, a text, or both x and y".to_string());
            }
        }
        StepAction::WaitUi {
            condition,
            tag,
            text,
            ..
        } => match condition {
            UiCondition::Present | UiCondition::Absent | UiCondition::Enabled if tag.is_none() => {
                return Err(format!("'{condition}' needs a tag"));
            }
            UiCondition::Text | UiCondition::TextContains if text.is_none() => {
                return Err(format!("'{condition}' needs a text"));
            }
            UiCondition::TextContains if tag.is_none() => {
                return Err(format!("'{condition}' needs a tag"));
            }
            _ => {}
        },
        StepAction::WaitLog {
            min_count,
            max_count,
            ..
        } => {
            if *min_count == 0 {
                return Err("min_count must be at least 1".to_string());
            }
            if let Some(max) = max_count {
                if max < min_count {
                    return Err(format!("max_count ({max}) is below min_count ({min_count})"));
                }
            }
        }
        _ => {}
    }
    Ok(())
}
