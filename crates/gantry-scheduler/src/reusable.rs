//! Reusable-workflow invocation: pinned snapshot lookup, input binding, and
//! secret forwarding.

use crate::catalog::{Catalog, WorkflowSnapshot};
use gantry_core::InvocationError;
use gantry_core::interpolation::value_to_string;
use gantry_core::workflow::{ReusableWorkflowRef, SecretInheritance, VersionedRef};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

type Result<T> = std::result::Result<T, InvocationError>;

pub const DEFAULT_NESTING_DEPTH: usize = 4;

/// A resolved invocation: the pinned snapshot plus everything bound at the
/// call boundary.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub snapshot: Arc<WorkflowSnapshot>,
    pub inputs: BTreeMap<String, Value>,
    /// The concrete secret set the nested run may use.
    pub secrets: BTreeSet<String>,
}

impl Invocation {
    /// Inputs rendered for `${{ inputs.* }}` substitution. Declared inputs
    /// without a value render as empty strings.
    pub fn input_context(&self) -> BTreeMap<String, String> {
        self.snapshot
            .definition
            .inputs
            .keys()
            .map(|name| {
                let rendered = self.inputs.get(name).map(value_to_string).unwrap_or_default();
                (name.clone(), rendered)
            })
            .collect()
    }
}

pub struct ReusableInvoker<'a> {
    catalog: &'a Catalog,
    max_depth: usize,
}

impl<'a> ReusableInvoker<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            max_depth: DEFAULT_NESTING_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve `reference` for a caller whose secret scope is `caller_scope`.
    /// `ancestry` lists the workflows already on the invocation stack.
    pub fn invoke(
        &self,
        reference: &ReusableWorkflowRef,
        caller_scope: &BTreeSet<String>,
        ancestry: &[VersionedRef],
    ) -> Result<Invocation> {
        let target = &reference.target;
        let workflow = target.to_string();

        if ancestry.contains(target) {
            return Err(InvocationError::RecursiveInvocation { workflow });
        }
        if ancestry.len() >= self.max_depth {
            return Err(InvocationError::NestingTooDeep {
                workflow,
                limit: self.max_depth,
            });
        }

        let snapshot = self.catalog.workflow(target)?;
        let inputs = bind_inputs(&snapshot, &workflow, &reference.with)?;
        let secrets = forward_secrets(&snapshot, &workflow, &reference.secrets, caller_scope)?;

        debug!(
            workflow = %workflow,
            digest = %snapshot.digest,
            inputs = inputs.len(),
            secrets = secrets.len(),
            "Resolved reusable workflow"
        );
        Ok(Invocation {
            snapshot,
            inputs,
            secrets,
        })
    }
}

fn bind_inputs(
    snapshot: &WorkflowSnapshot,
    workflow: &str,
    supplied: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    let declared = &snapshot.definition.inputs;
    if let Some(unknown) = supplied.keys().find(|k| !declared.contains_key(*k)) {
        return Err(InvocationError::UnexpectedInput {
            workflow: workflow.to_string(),
            input: unknown.clone(),
        });
    }

    let mut bound = BTreeMap::new();
    for (name, spec) in declared {
        let value = match (supplied.get(name), &spec.default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) if spec.required => {
                return Err(InvocationError::RequiredInputMissing {
                    workflow: workflow.to_string(),
                    input: name.clone(),
                });
            }
            (None, None) => continue,
        };
        if !spec.kind.accepts(&value) {
            return Err(InvocationError::InputTypeMismatch {
                workflow: workflow.to_string(),
                input: name.clone(),
                expected: spec.kind.to_string(),
            });
        }
        bound.insert(name.clone(), value);
    }
    Ok(bound)
}

fn forward_secrets(
    snapshot: &WorkflowSnapshot,
    workflow: &str,
    inheritance: &SecretInheritance,
    caller_scope: &BTreeSet<String>,
) -> Result<BTreeSet<String>> {
    let forwarded = match inheritance {
        SecretInheritance::InheritAll => caller_scope.clone(),
        SecretInheritance::Explicit(names) => {
            if let Some(missing) = names.iter().find(|n| !caller_scope.contains(*n)) {
                return Err(InvocationError::SecretNotInherited {
                    workflow: workflow.to_string(),
                    secret: missing.clone(),
                });
            }
            names.clone()
        }
    };

    if let Some(missing) = snapshot
        .definition
        .secrets
        .iter()
        .find(|s| !forwarded.contains(*s))
    {
        return Err(InvocationError::SecretNotInherited {
            workflow: workflow.to_string(),
            secret: missing.clone(),
        });
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::loader::load_str;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NOTIFY: &str = r#"
name: notify
inputs:
  channel:
    type: string
    required: true
  retries:
    type: number
    default: 2
  verbose:
    type: boolean
secrets: [SLACK_TOKEN]
jobs:
  send:
    runs_on: linux
    secrets: [SLACK_TOKEN]
    steps:
      - name: post
        run: notify --channel ${{ inputs.channel }}
        secrets: [SLACK_TOKEN]
"#;

    fn catalog() -> Catalog {
        let catalog = Catalog::new();
        catalog
            .publish_workflow(VersionedRef::new("org/ci/notify", "v2"), load_str(NOTIFY).unwrap())
            .unwrap();
        catalog
    }

    fn reference(with: Value, secrets: SecretInheritance) -> ReusableWorkflowRef {
        ReusableWorkflowRef {
            target: VersionedRef::new("org/ci/notify", "v2"),
            with: serde_json::from_value(with).unwrap(),
            secrets,
        }
    }

    fn scope(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_binds_inputs_with_defaults() {
        let catalog = catalog();
        let invocation = ReusableInvoker::new(&catalog)
            .invoke(
                &reference(json!({"channel": "#releases"}), SecretInheritance::InheritAll),
                &scope(&["SLACK_TOKEN", "NPM_TOKEN"]),
                &[],
            )
            .unwrap();

        assert_eq!(invocation.inputs.get("retries"), Some(&json!(2)));
        assert_eq!(
            invocation.input_context(),
            BTreeMap::from([
                ("channel".to_string(), "#releases".to_string()),
                ("retries".to_string(), "2".to_string()),
                ("verbose".to_string(), String::new()),
            ])
        );
        assert_eq!(invocation.secrets, scope(&["NPM_TOKEN", "SLACK_TOKEN"]));
    }

    #[test]
    fn test_input_errors() {
        let catalog = catalog();
        let invoker = ReusableInvoker::new(&catalog);
        let caller = scope(&["SLACK_TOKEN"]);

        let missing = invoker
            .invoke(&reference(json!({}), SecretInheritance::InheritAll), &caller, &[])
            .unwrap_err();
        assert!(matches!(missing, InvocationError::RequiredInputMissing { .. }));

        let wrong_type = invoker
            .invoke(
                &reference(json!({"channel": "#x", "retries": "many"}), SecretInheritance::InheritAll),
                &caller,
                &[],
            )
            .unwrap_err();
        assert_eq!(
            wrong_type.to_string(),
            "Input `retries` of workflow `org/ci/notify@v2` must be a number"
        );

        let unexpected = invoker
            .invoke(
                &reference(json!({"channel": "#x", "color": "red"}), SecretInheritance::InheritAll),
                &caller,
                &[],
            )
            .unwrap_err();
        assert!(matches!(unexpected, InvocationError::UnexpectedInput { .. }));
    }

    #[test]
    fn test_explicit_secrets_forward_only_subset() {
        let catalog = catalog();
        let invocation = ReusableInvoker::new(&catalog)
            .invoke(
                &reference(
                    json!({"channel": "#x"}),
                    SecretInheritance::Explicit(scope(&["SLACK_TOKEN"])),
                ),
                &scope(&["SLACK_TOKEN", "NPM_TOKEN"]),
                &[],
            )
            .unwrap();
        assert_eq!(invocation.secrets, scope(&["SLACK_TOKEN"]));
    }

    #[test]
    fn test_secret_not_inherited() {
        let catalog = catalog();
        let invoker = ReusableInvoker::new(&catalog);

        // caller forwards a secret it does not hold
        let err = invoker
            .invoke(
                &reference(json!({"channel": "#x"}), SecretInheritance::Explicit(scope(&["SLACK_TOKEN"]))),
                &scope(&[]),
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, InvocationError::SecretNotInherited { .. }));

        // callee declares a secret the caller did not forward
        let err = invoker
            .invoke(
                &reference(json!({"channel": "#x"}), SecretInheritance::Explicit(scope(&[]))),
                &scope(&["SLACK_TOKEN"]),
                &[],
            )
            .unwrap_err();
        assert_eq!(
            err,
            InvocationError::SecretNotInherited {
                workflow: "org/ci/notify@v2".to_string(),
                secret: "SLACK_TOKEN".to_string(),
            }
        );
    }

    #[test]
    fn test_version_not_found() {
        let catalog = catalog();
        let mut missing = reference(json!({"channel": "#x"}), SecretInheritance::InheritAll);
        missing.target.version = "v3".to_string();
        let err = ReusableInvoker::new(&catalog)
            .invoke(&missing, &scope(&["SLACK_TOKEN"]), &[])
            .unwrap_err();
        assert!(matches!(err, InvocationError::VersionNotFound { .. }));
    }

    #[test]
    fn test_recursion_and_depth() {
        let catalog = catalog();
        let target = VersionedRef::new("org/ci/notify", "v2");
        let reference = reference(json!({"channel": "#x"}), SecretInheritance::InheritAll);
        let caller = scope(&["SLACK_TOKEN"]);

        let err = ReusableInvoker::new(&catalog)
            .invoke(&reference, &caller, &[target])
            .unwrap_err();
        assert!(matches!(err, InvocationError::RecursiveInvocation { .. }));

        let chain = vec![VersionedRef::new("a", "v1"), VersionedRef::new("b", "v1")];
        let err = ReusableInvoker::new(&catalog)
            .with_max_depth(2)
            .invoke(&reference, &caller, &chain)
            .unwrap_err();
        assert!(matches!(err, InvocationError::NestingTooDeep { limit: 2, .. }));
    }
}
