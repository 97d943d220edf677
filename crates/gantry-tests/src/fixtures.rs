//! Sample workflow definitions and composite actions.

use gantry_core::loader::{self, Format};
use gantry_core::workflow::{CompositeAction, VersionedRef, WorkflowDefinition};
use gantry_scheduler::Catalog;

/// Factory for test workflow definitions.
pub struct WorkflowFixture;

impl WorkflowFixture {
    /// Push-triggered CI: `test` then `build`.
    pub fn ci() -> WorkflowDefinition {
        load(
            r#"
name: ci
triggers:
  - event: push
    branches: [main, "release/**"]
  - event: pull_request
    branches: [main]
jobs:
  test:
    runs_on: linux
    steps:
      - name: test
        run: npm test
  build:
    runs_on: linux
    needs: [test]
    steps:
      - name: build
        run: npm run build
"#,
        )
    }

    /// Tag-triggered release: `test`, then `build`, then `publish`.
    pub fn release() -> WorkflowDefinition {
        load(
            r#"
name: release
triggers:
  - event: tag_push
    tags: ["v*"]
permissions:
  contents: read
secrets: [NPM_TOKEN]
jobs:
  test:
    runs_on: linux
    steps:
      - name: test
        run: npm test
  build:
    runs_on: linux
    needs: [test]
    steps:
      - name: build
        run: npm run build
  publish:
    runs_on: linux
    needs: [build]
    permissions:
      packages: write
    secrets: [NPM_TOKEN]
    steps:
      - name: publish
        uses: gantry/publish
        with:
          package: my-lib
        secrets: [NPM_TOKEN]
"#,
        )
    }

    /// Four-leg matrix. Each leg runs `test shard N` then `report shard N`.
    pub fn matrix(fail_fast: bool, max_parallel: u32) -> WorkflowDefinition {
        load(&format!(
            r#"
name: matrix
jobs:
  test:
    runs_on: linux
    matrix:
      axes:
        shard: [1, 2, 3, 4]
      fail_fast: {fail_fast}
      max_parallel: {max_parallel}
    steps:
      - name: test
        run: test shard ${{{{ matrix.shard }}}}
      - name: report
        run: report shard ${{{{ matrix.shard }}}}
"#
        ))
    }

    /// `a` and `b` need each other. Parsed without validation.
    pub fn cyclic() -> WorkflowDefinition {
        loader::parse(
            r#"
name: cyclic
jobs:
  a:
    runs_on: linux
    needs: [b]
    steps: [{name: a, run: a}]
  b:
    runs_on: linux
    needs: [a]
    steps: [{name: b, run: b}]
"#,
            Format::Yaml,
        )
        .expect("cyclic fixture parses")
    }

    /// Deploy guarded by a concurrency group keyed on the ref.
    pub fn deploy(cancel_in_progress: bool) -> WorkflowDefinition {
        load(&format!(
            r#"
name: deploy
triggers:
  - event: push
    branches: [main]
concurrency:
  group: deploy-${{{{ ref }}}}
  cancel_in_progress: {cancel_in_progress}
jobs:
  deploy:
    runs_on: linux
    steps:
      - name: rollout
        run: rollout
      - name: verify
        run: verify
"#
        ))
    }

    /// Two steps in one job; only `sign` declares `SIGNING_KEY`.
    pub fn signing() -> WorkflowDefinition {
        load(
            r#"
name: signing
jobs:
  package:
    runs_on: linux
    secrets: [SIGNING_KEY, NPM_TOKEN]
    steps:
      - name: sign
        run: sign-artifacts
        secrets: [SIGNING_KEY]
      - name: inspect
        run: inspect-env
"#,
        )
    }

    /// A dependency install step cached on the lockfile.
    pub fn cached() -> WorkflowDefinition {
        load(
            r#"
name: cached
jobs:
  install:
    runs_on: linux
    steps:
      - name: install
        run: npm ci
        cache:
          namespace: npm
          manifest: [package-lock.json]
          paths: [node_modules]
"#,
        )
    }

    /// Caller of `org/ci/notify` at `version`, forwarding every secret.
    pub fn notify_caller(version: &str) -> WorkflowDefinition {
        load(&format!(
            r##"
name: caller
secrets: [SLACK_TOKEN]
jobs:
  build:
    runs_on: linux
    steps:
      - name: build
        run: make
  notify:
    needs: [build]
    uses: org/ci/notify@{version}
    with:
      channel: "#releases"
    secrets: inherit
"##
        ))
    }

    /// Reusable notify workflow; `message` differs between versions.
    pub fn notify(message: &str) -> WorkflowDefinition {
        load(&format!(
            r#"
name: notify
inputs:
  channel:
    type: string
    required: true
secrets: [SLACK_TOKEN]
jobs:
  send:
    runs_on: linux
    secrets: inherit
    steps:
      - name: post
        run: notify ${{{{ inputs.channel }}}} {message}
        secrets: [SLACK_TOKEN]
"#
        ))
    }

    /// CI using the `actions/setup-node@v4` composite.
    pub fn composite_user() -> WorkflowDefinition {
        load(
            r#"
name: node-ci
secrets: [NPM_TOKEN]
jobs:
  test:
    runs_on: linux
    secrets: [NPM_TOKEN]
    steps:
      - name: setup
        uses: actions/setup-node@v4
        with:
          node-version: "20"
      - name: test
        run: npm test
"#,
        )
    }
}

/// Factory for composite actions.
pub struct ActionFixture;

impl ActionFixture {
    pub fn setup_node() -> CompositeAction {
        loader::load_action_str(
            r#"
name: setup-node
version: v4
inputs:
  node-version:
    required: true
steps:
  - name: install
    run: nvm install ${{ inputs.node-version }}
    shell: bash
  - name: auth
    run: npm config set //registry.npmjs.org/:_authToken $NPM_TOKEN
    shell: sh
    secrets: [NPM_TOKEN]
"#,
            Format::Yaml,
        )
        .expect("setup-node fixture parses")
    }
}

/// Catalog with `actions/setup-node@v4` and `org/ci/notify@v1`.
pub fn sample_catalog() -> Catalog {
    let catalog = Catalog::new();
    catalog
        .publish_action(VersionedRef::new("actions/setup-node", "v4"), ActionFixture::setup_node())
        .expect("publish setup-node");
    catalog
        .publish_workflow(VersionedRef::new("org/ci/notify", "v1"), WorkflowFixture::notify("v1"))
        .expect("publish notify v1");
    catalog
}

fn load(source: &str) -> WorkflowDefinition {
    loader::load_str(source).expect("fixture is a valid workflow")
}
