//! Composite actions, reusable workflows and version pinning.

use gantry_core::loader::load_str;
use gantry_core::run::{JobStatus, RunStatus, StepStatus, TriggerEvent};
use gantry_core::workflow::VersionedRef;
use gantry_core::{DefinitionError, Error, InvocationError};
use gantry_tests::{TestEngine, WorkflowFixture, sample_catalog};
use pretty_assertions::assert_eq;

fn notify_ref(version: &str) -> VersionedRef {
    VersionedRef::new("org/ci/notify", version)
}

#[tokio::test]
async fn test_composite_steps_are_inlined() {
    let engine = TestEngine::builder()
        .catalog(sample_catalog())
        .secret("NPM_TOKEN", "npm_abc123")
        .build();

    let report = engine
        .run(&WorkflowFixture::composite_user(), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let steps: Vec<&str> = report.job("test").unwrap().steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(steps, vec!["setup / install", "setup / auth", "test"]);

    let calls = engine.runtime.calls();
    let shells: Vec<(&str, &str)> = calls
        .iter()
        .map(|c| (c.command.as_str(), c.shell.as_str()))
        .collect();
    assert_eq!(
        shells,
        vec![
            ("nvm install 20", "bash"),
            ("npm config set //registry.npmjs.org/:_authToken $NPM_TOKEN", "sh"),
            ("npm test", "bash"),
        ]
    );
    assert!(!calls[0].env.contains_key("NPM_TOKEN"));
    assert_eq!(calls[1].env.get("NPM_TOKEN").map(String::as_str), Some("npm_abc123"));
}

#[tokio::test]
async fn test_missing_composite_fails_only_its_job() {
    let engine = TestEngine::new();
    let definition = load_str(
        r#"
name: partial
jobs:
  lint:
    runs_on: linux
    steps: [{name: lint, run: npm run lint}]
  test:
    runs_on: linux
    steps: [{name: setup, uses: actions/setup-node@v9}]
"#,
    )
    .unwrap();

    let report = engine
        .run(&definition, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.job("lint").unwrap().status, JobStatus::Succeeded);
    let test = report.job("test").unwrap();
    assert_eq!(test.status, JobStatus::Failed);
    assert!(test.error.as_deref().unwrap().contains("actions/setup-node@v9"));
}

#[tokio::test]
async fn test_reusable_workflow_runs_as_nested_run() {
    let engine = TestEngine::builder()
        .catalog(sample_catalog())
        .secret("SLACK_TOKEN", "xoxb-9911")
        .build();

    let report = engine
        .run(&WorkflowFixture::notify_caller("v1"), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let notify = report.job("notify").unwrap();
    assert_eq!(notify.status, JobStatus::Succeeded);
    let nested = notify.nested.as_deref().unwrap();
    assert_eq!(nested.workflow, "notify");
    assert_eq!(nested.parent, Some(report.run_id));
    assert_eq!(
        nested.job("send").unwrap().step("post").unwrap().status,
        StepStatus::Succeeded
    );
    assert_eq!(engine.runtime.commands(), vec!["make", "notify #releases v1"]);
}

#[tokio::test]
async fn test_failed_nested_run_fails_the_caller_job() {
    let engine = TestEngine::builder()
        .catalog(sample_catalog())
        .secret("SLACK_TOKEN", "xoxb-9911")
        .build();
    engine.runtime.fail("notify #releases v1");

    let report = engine
        .run(&WorkflowFixture::notify_caller("v1"), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let notify = report.job("notify").unwrap();
    assert_eq!(notify.status, JobStatus::Failed);
    assert_eq!(notify.nested.as_deref().unwrap().status, RunStatus::Failed);
    assert_eq!(report.job("build").unwrap().status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_pinned_version_is_unaffected_by_later_publishes() {
    let engine = TestEngine::builder()
        .catalog(sample_catalog())
        .secret("SLACK_TOKEN", "xoxb-9911")
        .build();
    let before = engine.catalog().workflow(&notify_ref("v1")).unwrap();

    engine
        .catalog()
        .publish_workflow(notify_ref("v2"), WorkflowFixture::notify("v2"))
        .unwrap();
    let after = engine.catalog().workflow(&notify_ref("v1")).unwrap();
    assert_eq!(after.canonical, before.canonical);
    assert_eq!(after.digest, before.digest);
    assert_eq!(engine.catalog().versions("org/ci/notify"), vec!["v1", "v2"]);

    engine
        .run(&WorkflowFixture::notify_caller("v1"), &TriggerEvent::push("main"))
        .await
        .unwrap();
    engine
        .run(&WorkflowFixture::notify_caller("v2"), &TriggerEvent::push("main"))
        .await
        .unwrap();

    let notified: Vec<String> = engine
        .runtime
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("notify"))
        .collect();
    assert_eq!(notified, vec!["notify #releases v1", "notify #releases v2"]);
}

#[tokio::test]
async fn test_unpublished_version_fails_the_delegating_job() {
    let engine = TestEngine::builder()
        .catalog(sample_catalog())
        .secret("SLACK_TOKEN", "xoxb-9911")
        .build();

    let report = engine
        .run(&WorkflowFixture::notify_caller("v3"), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let notify = report.job("notify").unwrap();
    assert_eq!(notify.status, JobStatus::Failed);
    assert!(notify.nested.is_none());
    assert_eq!(
        notify.error.as_deref(),
        Some("Workflow `org/ci/notify` has no version `v3`")
    );
    assert_eq!(report.job("build").unwrap().status, JobStatus::Succeeded);
}

#[test]
fn test_published_versions_are_immutable() {
    let catalog = sample_catalog();

    catalog
        .publish_workflow(notify_ref("v1"), WorkflowFixture::notify("v1"))
        .unwrap();
    assert!(matches!(
        catalog.publish_workflow(notify_ref("v1"), WorkflowFixture::notify("edited")),
        Err(Error::Invocation(InvocationError::AlreadyPublished { .. }))
    ));
    assert!(catalog.publish_workflow(notify_ref("main"), WorkflowFixture::notify("v1")).is_err());
}

#[test]
fn test_moving_references_are_rejected() {
    let result = load_str(
        r#"
name: caller
jobs:
  notify:
    uses: org/ci/notify@main
"#,
    );
    assert!(matches!(result, Err(DefinitionError::MovingReference { .. })));
}

#[tokio::test]
async fn test_recursive_invocation_fails_the_nested_job() {
    let catalog = sample_catalog();
    let looping = load_str(
        r#"
name: loop
jobs:
  again:
    uses: org/ci/loop@v1
"#,
    )
    .unwrap();
    catalog
        .publish_workflow(VersionedRef::new("org/ci/loop", "v1"), looping)
        .unwrap();
    let engine = TestEngine::builder().catalog(catalog).build();
    let caller = load_str(
        r#"
name: caller
jobs:
  start:
    uses: org/ci/loop@v1
"#,
    )
    .unwrap();

    let report = engine
        .run(&caller, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let nested = report.job("start").unwrap().nested.as_deref().unwrap();
    let again = nested.job("again").unwrap();
    assert_eq!(again.status, JobStatus::Failed);
    assert!(again.error.as_deref().unwrap().contains("invokes itself"));
}
