//! Definition parsing tests for gantry-core types.

use gantry_core::loader::{self, Format};
use gantry_core::run::*;
use gantry_core::workflow::*;
use pretty_assertions::assert_eq;
use serde_json::json;

const RELEASE: &str = r#"
name: release
permissions:
  contents: read
concurrency:
  group: release-${{ ref }}
  cancel_in_progress: true
triggers:
  - event: tag_push
    tags: ["v*"]
jobs:
  test:
    runs_on: ubuntu
    matrix:
      axes:
        node: [18, 20]
        os: [linux, macos]
      exclude:
        - { node: 18, os: macos }
      fail_fast: false
      max_parallel: 2
    steps:
      - name: install
        uses: org/setup-node@v1
        with:
          version: "${{ matrix.node }}"
      - name: test
        run: npm test
        shell: bash
        cache:
          namespace: npm
          manifest: [package-lock.json]
          paths: [node_modules]
  publish:
    runs_on: ubuntu
    needs: [test]
    permissions:
      packages: write
    secrets: [NPM_TOKEN]
    steps:
      - name: publish
        uses: gantry/publish
        secrets: [NPM_TOKEN]
        with:
          package: my-lib
  notify:
    needs: [publish]
    uses: org/ci/notify.yaml@v2.1.0
    with:
      channel: releases
      urgent: true
    secrets: inherit
"#;

#[test]
fn test_release_definition_parses() {
    let def = loader::load_str(RELEASE).expect("valid definition");

    assert_eq!(def.triggers[0].event, EventKind::TagPush);
    assert_eq!(def.permissions.level("contents"), Access::Read);
    assert_eq!(
        def.concurrency.as_ref().map(|c| c.mode()),
        Some(ConcurrencyMode::CancelInProgress)
    );

    let test = def.job("test").unwrap();
    let matrix = test.matrix.as_ref().unwrap();
    assert_eq!(matrix.axes["node"], vec![json!(18), json!(20)]);
    assert!(!test.fail_fast());
    assert_eq!(matrix.max_parallel, Some(2));
    assert_eq!(
        test.steps[1].cache.as_ref().map(|c| c.namespace.as_str()),
        Some("npm")
    );

    let publish = def.job("publish").unwrap();
    assert!(publish.steps[0].is_publish());
    let effective = def.permissions.elevated_by(publish.permissions.as_ref());
    assert!(effective.allows(PACKAGES_CAPABILITY, Access::Write));

    let notify = def.job("notify").unwrap();
    let reference = notify.reusable_ref().unwrap().unwrap();
    assert_eq!(reference.target, VersionedRef::new("org/ci/notify.yaml", "v2.1.0"));
    assert_eq!(reference.secrets, SecretInheritance::InheritAll);
    assert_eq!(reference.with["urgent"], json!(true));
}

#[test]
fn test_job_order_respects_needs() {
    let def = loader::load_str(RELEASE).unwrap();
    assert_eq!(
        loader::job_order(&def).unwrap(),
        vec!["test", "publish", "notify"]
    );
}

#[test]
fn test_composite_action_parses() {
    let yaml = r#"
name: setup-node
version: v1
inputs:
  version:
    required: true
  registry:
    default: https://registry.npmjs.org
steps:
  - name: install
    run: install-node ${{ inputs.version }}
    shell: bash
"#;
    let action = loader::load_action_str(yaml, Format::Yaml).unwrap();
    assert!(action.inputs["version"].required);
    assert_eq!(
        action.inputs["registry"].default.as_deref(),
        Some("https://registry.npmjs.org")
    );
}

#[test]
fn test_trigger_event_roundtrip() {
    let event = TriggerEvent::tag("refs/tags/v1.0.0");
    let json = serde_json::to_string(&event).expect("serialize");
    let parsed: TriggerEvent = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(event, parsed);
    assert!(parsed.is_tag_push());
}

#[test]
fn test_definition_schema_generation() {
    let schema = schemars::schema_for!(WorkflowDefinition);
    let json = serde_json::to_value(&schema).unwrap();
    assert!(json["properties"]["jobs"].is_object());
}
