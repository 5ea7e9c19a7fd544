//! Executes scenario steps against the step context

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::config::{JourneySpec, ScenarioFile, StepAction, StepSpec, UiCondition};
use super::template::Vars;
use crate::common::{truncate, Error, Result};
use crate::correlator::{find_correlated, LogEvent, Pattern};
use crate::device::{AdbDevice, HttpRequest};
use crate::journey::{Journey, StepContext, StepOutcome};
use crate::poller::{predicate, Outcome, Predicate, WaitKind, WaitSpec};
use crate::snapshot::{predicates, Snapshot};

/// Build one journey per scenario entry, in file order
pub fn build_journeys(scenario: &ScenarioFile) -> Vec<Journey> {
    scenario
        .journeys
        .iter()
        .map(|spec| build_journey(spec, &scenario.vars))
        .collect()
}

fn build_journey(spec: &JourneySpec, file_vars: &BTreeMap<String, String>) -> Journey {
    let mut initial = file_vars.clone();
    initial.extend(spec.vars.clone());
    let vars = Vars::new(initial);

    let mut journey = Journey::new(&spec.name);
    if let Some(description) = &spec.description {
        journey = journey.describe(description);
    }
    for step in &spec.steps {
        let step = step.clone();
        let vars = vars.clone();
        journey.push_step(step.display_name(), move |ctx| {
            let step = step.clone();
            let vars = vars.clone();
            async move { execute(&ctx, &step, &vars).await }
        });
    }
    journey
}

/// Run one step; a failed outcome carries a diagnostics capture
async fn execute(ctx: &StepContext, step: &StepSpec, vars: &Vars) -> Result<StepOutcome> {
    let name = step.display_name();
    debug!(step = %name, "executing scenario step");
    let outcome = match &step.action {
        StepAction::Shell {
            command,
            device,
            expect_exit,
            output_contains,
        } => {
            let command = vars.render(command)?;
            let output = if *device {
                adb(ctx).shell(&command).await?
            } else {
                ctx.exec(&command).await?
            };
            if output.exit_code != *expect_exit {
                fail(
                    &name,
                    format!(
                        "exit code {} (expected {}): {}",
                        output.exit_code,
                        expect_exit,
                        truncate(output.stderr.trim(), 300)
                    ),
                )
            } else if let Some(needle) = vars.render_opt(output_contains.as_deref())? {
                if output.stdout.contains(&needle) {
                    StepOutcome::pass(format!("output contains '{needle}'"))
                } else {
                    fail(
                        &name,
                        format!(
                            "output does not contain '{}': {}",
                            needle,
                            truncate(output.stdout.trim(), 300)
                        ),
                    )
                }
            } else {
                StepOutcome::pass(format!("exit code {}", output.exit_code))
            }
        }
        StepAction::Launch { component, fresh } => {
            let component = vars.render(component)?;
            let device = adb(ctx);
            if *fresh {
                let package = component.split('/').next().unwrap_or(&component);
                device.force_stop(package).await?;
            }
            device.launch(&component).await?;
            StepOutcome::pass(format!("launched {component}"))
        }
        StepAction::Tap { tag, text, x, y } => {
            let tag = vars.render_opt(tag.as_deref())?;
            let text = vars.render_opt(text.as_deref())?;
            let snapshot = ctx.capture().await?;
            match resolve_tap(&snapshot, tag.as_deref(), text.as_deref(), *x, *y) {
                Some((px, py, how)) => {
                    adb(ctx).tap(px, py).await?;
                    StepOutcome::pass(format!("tapped {how} at {px},{py}"))
                }
                None => fail(
                    &name,
                    format!("no tap target on screen ({})", snapshot.summary()),
                ),
            }
        }
        StepAction::Input { text } => {
            let text = vars.render(text)?;
            adb(ctx).input_text(&text).await?;
            StepOutcome::pass(format!("typed {} chars", text.chars().count()))
        }
        StepAction::Key { key } => {
            adb(ctx).keyevent(&vars.render(key)?).await?;
            StepOutcome::pass(format!("sent {key}"))
        }
        StepAction::ClearLogs => {
            adb(ctx).clear_logs().await?;
            StepOutcome::pass("log buffer cleared")
        }
        StepAction::Sleep { ms } => {
            ctx.clock().sleep(Duration::from_millis(*ms)).await;
            StepOutcome::pass(format!("slept {ms} ms"))
        }
        StepAction::Http {
            method,
            url,
            headers,
            body,
            expect_status,
            accept_status,
            capture,
        } => {
            let mut request = HttpRequest::new(method, vars.render(url)?);
            for (header, value) in headers {
                request = request.header(header, vars.render(value)?);
            }
            if let Some(body) = vars.render_opt(body.as_deref())? {
                request = request.body(body);
            }
            let response = ctx.http(&request).await?;
            let expected = if expect_status.is_empty() {
                response.is_success()
            } else {
                expect_status.contains(&response.status)
            };
            let line = format!("{} {} -> {}", request.method, request.url, response.status);

            if expected {
                capture_json(&name, &response.body, capture, vars)?
                    .unwrap_or_else(|| StepOutcome::pass(line))
            } else if accept_status.contains(&response.status) {
                let warning = format!(
                    "{line}: accepted status, treated as an environment limitation"
                );
                warn!("{warning}");
                StepOutcome::warn(line, warning)
            } else {
                fail(
                    &name,
                    format!("{line}: unexpected status ({})", truncate(&response.body, 200)),
                )
            }
        }
        StepAction::WaitUi {
            condition,
            tag,
            text,
            timeout_ms,
            poll_interval_ms,
            critical,
        } => {
            let tag = vars.render_opt(tag.as_deref())?;
            let text = vars.render_opt(text.as_deref())?;
            let (kind, check) = ui_predicate(*condition, tag.as_deref(), text.as_deref())?;
            let spec = tune(
                ctx.wait_spec(kind, name.clone(), check),
                *timeout_ms,
                *poll_interval_ms,
                *critical,
            );
            ctx.wait_ui(&spec, None).await?.into_step(&spec)
        }
        StepAction::WaitLog {
            pattern,
            extract,
            correlation,
            min_count,
            max_count,
            settle_ms,
            timeout_ms,
            poll_interval_ms,
            critical,
        } => {
            let mut compiled = Pattern::new(&name, &vars.render(pattern)?)?;
            for (field, group) in extract {
                compiled = compiled.extract(*group, field);
            }
            let patterns = [compiled];
            let correlation = vars.render_opt(correlation.as_deref())?;
            let spec = tune(
                ctx.wait_spec(
                    WaitKind::LogEvent,
                    name.clone(),
                    log_count_at_least(correlation.clone(), *min_count),
                ),
                *timeout_ms,
                *poll_interval_ms,
                *critical,
            );

            let since = ctx.now_ms();
            let outcome = ctx.wait_log(&spec, &patterns, since).await?;
            let reached_ms = outcome.elapsed_ms();
            let mut events = outcome.value().cloned().unwrap_or_default();
            let mut step = outcome.into_step(&spec);

            // A duplicate may be logged after the first match
            if let (Some(max), true) = (max_count, step.success) {
                let window =
                    (*settle_ms).unwrap_or_else(|| spec.timeout_ms().saturating_sub(reached_ms));
                if window > 0 {
                    let watch = ctx
                        .wait_spec(
                            WaitKind::LogEvent,
                            format!("{name} (duplicates)"),
                            log_count_above(correlation.clone(), *max),
                        )
                        .timeout(Duration::from_millis(window))
                        .poll_interval(Duration::from_millis(spec.poll_interval_ms().min(window)))
                        .soft();
                    match ctx.wait_log(&watch, &patterns, since).await? {
                        Outcome::Reached { value, .. } => events = value,
                        Outcome::TimedOut {
                            last: Some(last), ..
                        } => events = last,
                        Outcome::TimedOut { last: None, .. } => {}
                        cancelled @ Outcome::Cancelled { .. } => step = cancelled.into_step(&watch),
                    }
                }
            }

            let matched = relevant(&events, &correlation);
            match (max_count, matched.first()) {
                (Some(max), _) if matched.len() > *max => fail(
                    &name,
                    format!("{} matching log events, at most {max} allowed", matched.len()),
                ),
                (_, Some(event)) if step.success => {
                    for (key, value) in &event.fields {
                        vars.set(key.as_str(), value.as_str());
                    }
                    step
                }
                _ => step,
            }
        }
    };

    if outcome.success {
        return Ok(outcome);
    }
    let artifact = ctx.capture_failure(&name, Some(&outcome.detail)).await;
    Ok(outcome.with_artifact(artifact))
}

fn fail(step: &str, reason: String) -> StepOutcome {
    let err = Error::step_failed(step, reason.clone());
    StepOutcome::fail(reason, &err)
}

/// Device handle over the context's command runner
fn adb(ctx: &StepContext) -> AdbDevice {
    AdbDevice::new(
        ctx.config.device.adb_path.clone(),
        ctx.config.device.serial.clone(),
        ctx.collaborators.commands.clone(),
    )
}

fn tune<T>(
    spec: WaitSpec<T>,
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    critical: bool,
) -> WaitSpec<T> {
    let mut spec = spec.critical(critical);
    if let Some(ms) = timeout_ms {
        spec = spec.timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = poll_interval_ms {
        spec = spec.poll_interval(Duration::from_millis(ms));
    }
    spec
}

/// Tap strategies in order: element by tag, element by visible text,
/// explicit coordinates
fn resolve_tap(
    snapshot: &Snapshot,
    tag: Option<&str>,
    text: Option<&str>,
    x: Option<i32>,
    y: Option<i32>,
) -> Option<(i32, i32, String)> {
    let by_tag = || {
        let tag = tag?;
        let bounds = snapshot.element(tag)?.bounds?;
        let (cx, cy) = bounds.center();
        Some((cx, cy, format!("'{tag}'")))
    };
    let by_text = || {
        let text = text?;
        snapshot
            .named_elements()
            .iter()
            .filter(|(_, e)| e.text.as_deref().map(|t| t.contains(text)).unwrap_or(false))
            .find_map(|(tag, e)| {
                let (cx, cy) = e.bounds?.center();
                Some((cx, cy, format!("'{tag}' by text")))
            })
    };
    let by_coords = || Some((x?, y?, "coordinates".to_string()));

    by_tag().or_else(by_text).or_else(by_coords)
}

fn ui_predicate(
    condition: UiCondition,
    tag: Option<&str>,
    text: Option<&str>,
) -> Result<(WaitKind, Predicate<Snapshot>)> {
    let need = |value: Option<&str>, what: &str| {
        value
            .map(str::to_string)
            .ok_or_else(|| Error::Scenario(format!("'{condition}' needs a {what}")))
    };
    Ok(match condition {
        UiCondition::Present => (
            WaitKind::ElementPresent,
            predicates::element_present(&need(tag, "tag")?),
        ),
        UiCondition::Absent => (
            WaitKind::ElementAbsent,
            predicates::element_absent(&need(tag, "tag")?),
        ),
        UiCondition::Enabled => (
            WaitKind::Custom,
            predicates::element_enabled(&need(tag, "tag")?),
        ),
        UiCondition::Text => {
            let text = need(text, "text")?;
            let check = match tag {
                Some(tag) => predicates::text_equals(tag, &text),
                None => predicates::any_text_contains(&text),
            };
            (WaitKind::Text, check)
        }
        UiCondition::TextContains => (
            WaitKind::Text,
            predicates::text_contains(&need(tag, "tag")?, &need(text, "text")?),
        ),
        UiCondition::Changed => {
            let check = match tag {
                Some(tag) => predicates::element_changed(tag),
                None => predicates::changed(),
            };
            (WaitKind::StateChange, check)
        }
    })
}

fn relevant<'a>(events: &'a [LogEvent], correlation: &Option<String>) -> Vec<&'a LogEvent> {
    match correlation {
        Some(id) => find_correlated(events, id),
        None => events.iter().collect(),
    }
}

fn log_count_at_least(correlation: Option<String>, min: usize) -> Predicate<Vec<LogEvent>> {
    predicate(move |_, events: &Vec<LogEvent>, _| relevant(events, &correlation).len() >= min)
}

fn log_count_above(correlation: Option<String>, max: usize) -> Predicate<Vec<LogEvent>> {
    predicate(move |_, events: &Vec<LogEvent>, _| relevant(events, &correlation).len() > max)
}

/// Store JSON-pointer captures as variables; a missing pointer fails the step
fn capture_json(
    step: &str,
    body: &str,
    capture: &BTreeMap<String, String>,
    vars: &Vars,
) -> Result<Option<StepOutcome>> {
    if capture.is_empty() {
        return Ok(None);
    }
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return Ok(Some(fail(step, "response body is not JSON".to_string())));
    };
    let mut captured = Vec::new();
    for (var, pointer) in capture {
        let Some(value) = json.pointer(pointer) else {
            return Ok(Some(fail(
                step,
                format!("response has no value at '{pointer}'"),
            )));
        };
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        info!(var = %var, value = %truncate(&value, 80), "captured variable");
        vars.set(var, value);
        captured.push(var.as_str());
    }
    Ok(Some(StepOutcome::pass(format!("captured {}", captured.join(", ")))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::device::fakes::FakeDevice;
    use crate::device::{CommandOutput, LogQuery, LogReader};
    use crate::journey::JourneyResult;
    use crate::snapshot::parse_hierarchy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SCREEN: &str = r#"<hierarchy><node resource-id="p:id/go" text="Start" class="B" enabled="true" bounds="[0,0][100,50]"/><node resource-id="p:id/title" text="Welcome back" class="T" bounds="[0,100][200,150]"/></hierarchy>"#;

    async fn run(device: &FakeDevice, yaml: &str) -> JourneyResult {
        let scenario = ScenarioFile::parse(yaml).unwrap();
        let mut journey = build_journeys(&scenario).remove(0);
        let ctx = StepContext::new(device.collaborators(), Config::default());
        journey.run(&ctx).await
    }

    #[test]
    fn test_resolve_tap_strategies() {
        let snap = parse_hierarchy(SCREEN, 0);
        let (x, y, _) = resolve_tap(&snap, Some("go"), None, None, None).unwrap();
        assert_eq!((x, y), (50, 25));
        let (x, y, how) = resolve_tap(&snap, Some("missing"), Some("Welcome"), None, None).unwrap();
        assert_eq!((x, y), (100, 125));
        assert!(how.contains("title"));
        let (x, y, _) = resolve_tap(&snap, Some("missing"), None, Some(1), Some(2)).unwrap();
        assert_eq!((x, y), (1, 2));
        assert!(resolve_tap(&snap, Some("missing"), Some("nothing"), None, None).is_none());
    }

    #[tokio::test]
    async fn test_device_actions_issue_adb_commands() {
        let device = FakeDevice::new();
        device.ui.set(SCREEN);
        let result = run(
            &device,
            r#"
journeys:
  - name: j
    steps:
      - action: launch
        component: app.example/.Main
        fresh: true
      - action: tap
        tag: go
      - action: input
        text: "hello world"
      - action: key
        key: KEYCODE_ENTER
      - action: clear_logs
"#,
        )
        .await;

        assert!(result.success, "{result:?}");
        let commands = device.runner.commands();
        assert_eq!(
            commands,
            vec![
                "adb shell am force-stop app.example",
                "adb shell am start -W -n app.example/.Main",
                "adb shell input tap 50 25",
                "adb shell input text hello%sworld",
                "adb shell input keyevent KEYCODE_ENTER",
                "adb logcat -c",
            ]
        );
    }

    #[tokio::test]
    async fn test_shell_exit_code_mismatch_fails_with_artifact() {
        let device = FakeDevice::new();
        device.runner.respond(CommandOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: "no such file".into(),
        });
        let result = run(
            &device,
            "journeys:\n  - name: j\n    steps:\n      - action: shell\n        command: ls /nope\n",
        )
        .await;

        assert!(!result.success);
        assert!(result.steps[0].detail.contains("exit code 2"));
        assert!(result.failure_artifact.is_some());
        assert_eq!(device.sink.len(), 1);
    }

    #[tokio::test]
    async fn test_http_capture_feeds_later_steps() {
        let device = FakeDevice::new();
        device.http.route("POST", "/jobs", 201, r#"{"id": "job-7", "n": 3}"#);
        device.http.route("GET", "/jobs/job-7", 200, "{}");
        let result = run(
            &device,
            r#"
journeys:
  - name: j
    steps:
      - action: http
        method: POST
        url: /jobs
        expect_status: [201]
        capture:
          job: /id
          count: /n
      - action: http
        url: "/jobs/${job}"
"#,
        )
        .await;

        assert!(result.success, "{result:?}");
        let requests = device.http.requests();
        assert_eq!(requests[1].url, "/jobs/job-7");
    }

    #[tokio::test]
    async fn test_accepted_status_is_a_warning() {
        let device = FakeDevice::new();
        device.http.route("GET", "/me", 401, "");
        let result = run(
            &device,
            "journeys:\n  - name: j\n    steps:\n      - action: http\n        url: /me\n        accept_status: [401, 404]\n",
        )
        .await;

        assert!(result.success);
        assert_eq!(result.steps[0].warnings.len(), 1);
        assert!(result.steps[0].warnings[0].contains("401"));
    }

    #[tokio::test]
    async fn test_unexpected_status_fails() {
        let device = FakeDevice::new();
        device.http.route("GET", "/me", 500, "boom");
        let result = run(
            &device,
            "journeys:\n  - name: j\n    steps:\n      - action: http\n        url: /me\n        accept_status: [401]\n",
        )
        .await;

        assert!(!result.success);
        assert_eq!(result.steps[0].error.as_ref().unwrap().kind, "STEP_FAILURE");
    }

    #[tokio::test]
    async fn test_wait_ui_soft_timeout_continues() {
        let device = FakeDevice::new();
        device.ui.set(SCREEN);
        let result = run(
            &device,
            r#"
journeys:
  - name: j
    steps:
      - action: wait_ui
        condition: present
        tag: banner
        timeout_ms: 2000
        critical: false
      - action: wait_ui
        condition: text
        tag: title
        text: Welcome back
"#,
        )
        .await;

        assert!(result.success, "{result:?}");
        assert_eq!(result.steps[0].warnings.len(), 1);
        assert_eq!(result.steps[0].elapsed_ms, 2_000);
        assert!(result.steps[1].warnings.is_empty());
    }

    #[tokio::test]
    async fn test_wait_ui_critical_timeout_fails() {
        let device = FakeDevice::new();
        device.ui.set(SCREEN);
        let result = run(
            &device,
            "journeys:\n  - name: j\n    steps:\n      - action: wait_ui\n        condition: absent\n        tag: go\n        timeout_ms: 3000\n",
        )
        .await;

        assert!(!result.success);
        let err = result.steps[0].error.as_ref().unwrap();
        assert_eq!(err.kind, "CRITICAL_STATE_CHANGE_FAILURE");
        assert!(result.failure_artifact.is_some());
    }

    #[tokio::test]
    async fn test_wait_log_correlation_and_duplicates() {
        let device = FakeDevice::new();
        let now = device.now_ms();
        device.logs.log(now, "Worker", "job job-1 done");
        device.logs.log(now + 1, "Worker", "job job-2 done");
        device.logs.log(now + 2, "Worker", "job job-1 done");

        let yaml = |max: usize| {
            format!(
                r#"
vars:
  job: job-1
journeys:
  - name: j
    steps:
      - action: wait_log
        pattern: 'job (\S+) done'
        extract:
          finished: 1
        correlation: "${{job}}"
        max_count: {max}
      - action: shell
        command: echo ${{finished}}
"#
            )
        };

        let ok = run(&device, &yaml(2)).await;
        assert!(ok.success, "{ok:?}");
        assert_eq!(device.runner.commands().last().unwrap(), "echo job-1");

        let dup = run(&device, &yaml(1)).await;
        assert!(!dup.success);
        assert!(dup.steps[0].detail.contains("2 matching log events"));
    }

    /// Logs one completion on the first read and a duplicate on later reads
    struct LateDuplicateLogs {
        start_ms: u64,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl LogReader for LateDuplicateLogs {
        async fn read_logs(&self, query: LogQuery) -> Result<String> {
            if let LogQuery::Tail(_) = query {
                return Ok(String::new());
            }
            let reads = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            let line = |ms: u64| {
                format!(
                    "{}.{:03}  4242  4242 I Worker: job job-1 done",
                    ms / 1000,
                    ms % 1000
                )
            };
            let mut lines = vec![line(self.start_ms)];
            if reads > 1 {
                lines.push(line(self.start_ms + 1500));
            }
            Ok(lines.join("\n"))
        }
    }

    #[tokio::test]
    async fn test_wait_log_catches_duplicate_logged_after_first_match() {
        let device = FakeDevice::new();
        let logs = Arc::new(LateDuplicateLogs {
            start_ms: device.now_ms(),
            reads: AtomicUsize::new(0),
        });
        let mut collaborators = device.collaborators();
        collaborators.logs = logs.clone();

        let scenario = ScenarioFile::parse(
            r#"
journeys:
  - name: j
    steps:
      - action: wait_log
        pattern: 'job (\S+) done'
        max_count: 1
        timeout_ms: 5000
"#,
        )
        .unwrap();
        let mut journey = build_journeys(&scenario).remove(0);
        let result = journey
            .run(&StepContext::new(collaborators, Config::default()))
            .await;

        assert!(!result.success);
        assert!(result.steps[0].detail.contains("2 matching log events"));
        assert_eq!(logs.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_log_single_match_holds_through_settle_window() {
        let device = FakeDevice::new();
        device.logs.log(device.now_ms(), "Worker", "job job-1 done");
        let result = run(
            &device,
            r#"
journeys:
  - name: j
    steps:
      - action: wait_log
        pattern: 'job (\S+) done'
        max_count: 1
        settle_ms: 3000
"#,
        )
        .await;

        assert!(result.success, "{result:?}");
        assert_eq!(result.steps[0].elapsed_ms, 3_000);
    }
}
