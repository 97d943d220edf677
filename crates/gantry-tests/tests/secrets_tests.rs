//! Secret scoping and redaction.

use gantry_core::events::Event;
use gantry_core::loader::load_str;
use gantry_core::run::{JobStatus, RunStatus, StepStatus, TriggerEvent};
use gantry_tests::{TestEngine, WorkflowFixture, sample_catalog};
use pretty_assertions::assert_eq;

const SIGNING_KEY: &str = "sig_7f3a9c1e";
const NPM_TOKEN: &str = "npm_abc123";

fn engine() -> TestEngine {
    let engine = TestEngine::builder()
        .secret("SIGNING_KEY", SIGNING_KEY)
        .secret("NPM_TOKEN", NPM_TOKEN)
        .build();
    engine.runtime.echo_env("sign-artifacts");
    engine.runtime.echo_env("inspect-env");
    engine
}

#[tokio::test]
async fn test_steps_see_only_declared_secrets() {
    let engine = engine();

    let report = engine
        .run(&WorkflowFixture::signing(), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let sign = engine.runtime.env_of("sign-artifacts").unwrap();
    assert_eq!(sign.get("SIGNING_KEY").map(String::as_str), Some(SIGNING_KEY));
    assert!(!sign.contains_key("NPM_TOKEN"));

    let inspect = engine.runtime.env_of("inspect-env").unwrap();
    assert!(!inspect.contains_key("SIGNING_KEY"));
    assert!(!inspect.contains_key("NPM_TOKEN"));

    let accessed: Vec<(String, String)> = engine
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::SecretAccessed(p) => Some((p.step, p.secret)),
            _ => None,
        })
        .collect();
    assert_eq!(accessed, vec![("sign".to_string(), "SIGNING_KEY".to_string())]);
}

#[tokio::test]
async fn test_secret_values_never_leave_the_step() {
    let engine = engine();

    engine
        .run(&WorkflowFixture::signing(), &TriggerEvent::push("main"))
        .await
        .unwrap();

    let lines = engine.events.output_lines();
    assert!(lines.contains(&"SIGNING_KEY=***".to_string()));
    for event in engine.events.events() {
        let serialized = serde_json::to_string(&event).unwrap();
        assert!(!serialized.contains(SIGNING_KEY), "leaked in {serialized}");
        assert!(!serialized.contains(NPM_TOKEN), "leaked in {serialized}");
    }
}

#[tokio::test]
async fn test_missing_vault_entry_fails_the_step() {
    let engine = TestEngine::builder().secret("NPM_TOKEN", NPM_TOKEN).build();

    let report = engine
        .run(&WorkflowFixture::signing(), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let job = report.job("package").unwrap();
    assert_eq!(job.step("sign").unwrap().status, StepStatus::Failed);
    assert_eq!(job.step("inspect").unwrap().status, StepStatus::Skipped);
    assert!(engine.runtime.commands().is_empty());
}

#[tokio::test]
async fn test_nested_run_sees_only_forwarded_secrets() {
    let engine = TestEngine::builder()
        .catalog(sample_catalog())
        .secret("SLACK_TOKEN", "xoxb-9911")
        .build();
    engine.runtime.echo_env("notify #releases v1");

    let report = engine
        .run(&WorkflowFixture::notify_caller("v1"), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let env = engine.runtime.env_of("notify #releases v1").unwrap();
    assert_eq!(env.get("SLACK_TOKEN").map(String::as_str), Some("xoxb-9911"));
    assert!(
        engine
            .events
            .output_lines()
            .iter()
            .all(|line| !line.contains("xoxb-9911"))
    );
}

#[tokio::test]
async fn test_withholding_a_required_secret_fails_the_delegating_job() {
    let engine = TestEngine::builder()
        .catalog(sample_catalog())
        .secret("SLACK_TOKEN", "xoxb-9911")
        .build();
    let definition = load_str(
        r##"
name: stingy
secrets: [SLACK_TOKEN]
jobs:
  notify:
    uses: org/ci/notify@v1
    with:
      channel: "#releases"
    secrets: []
"##,
    )
    .unwrap();

    let report = engine
        .run(&definition, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let job = report.job("notify").unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("SLACK_TOKEN"));
    assert!(engine.runtime.commands().is_empty());
}
