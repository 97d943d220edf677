//! Composite action expansion.
//!
//! A `uses:` step that names a composite action is replaced by the action's
//! steps, with `${{ inputs.* }}` substituted. Inlined steps keep their own
//! shells and gain the secrets the calling step forwards.

use crate::catalog::Catalog;
use gantry_core::ResolutionError;
use gantry_core::interpolation::{InterpolationContext, input_references};
use gantry_core::workflow::{CompositeAction, StepAction, StepDefinition, VersionedRef};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

type Result<T> = std::result::Result<T, ResolutionError>;

pub const DEFAULT_COMPOSITE_DEPTH: usize = 8;

pub struct CompositeResolver<'a> {
    catalog: &'a Catalog,
    max_depth: usize,
}

impl<'a> CompositeResolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            max_depth: DEFAULT_COMPOSITE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Expand every composite reference in a job's steps. Run steps and the
    /// built-in publish action pass through; every step's secrets must be
    /// within `grants`.
    pub fn expand_steps(
        &self,
        steps: &[StepDefinition],
        grants: &BTreeSet<String>,
    ) -> Result<Vec<StepDefinition>> {
        let mut expanded = Vec::with_capacity(steps.len());
        for step in steps {
            expanded.extend(self.expand_step(step, grants, 0)?);
        }
        Ok(expanded)
    }

    /// Expand one step that references a composite action.
    pub fn expand(
        &self,
        step: &StepDefinition,
        grants: &BTreeSet<String>,
    ) -> Result<Vec<StepDefinition>> {
        self.expand_step(step, grants, 0)
    }

    fn expand_step(
        &self,
        step: &StepDefinition,
        grants: &BTreeSet<String>,
        depth: usize,
    ) -> Result<Vec<StepDefinition>> {
        check_scope(step, grants)?;

        let reference = match step.action() {
            Some(StepAction::Uses { reference, .. }) if !step.is_publish() => reference,
            _ => return Ok(vec![step.clone()]),
        };
        let target = VersionedRef::parse(reference).ok_or_else(|| ResolutionError::ActionNotFound {
            reference: reference.to_string(),
        })?;
        if depth >= self.max_depth {
            return Err(ResolutionError::NestingTooDeep {
                reference: reference.to_string(),
                limit: self.max_depth,
            });
        }

        let action = self.catalog.action(&target)?;
        let inputs = bind_inputs(&action, reference, &step.with)?;
        let ctx = InterpolationContext::new().with_inputs(inputs);

        let mut inlined = Vec::with_capacity(action.steps.len());
        for inner in &action.steps {
            check_input_references(&action, reference, inner)?;
            if let Some(StepAction::Run { shell: None, .. }) = inner.action() {
                return Err(ResolutionError::ShellNotDeclared {
                    action: reference.to_string(),
                    step: inner.name.clone(),
                });
            }

            let mut env = step.env.clone();
            env.extend(ctx.interpolate_map(&inner.env));

            let mut secrets = inner.secrets.clone();
            for forwarded in &step.secrets {
                if !secrets.contains(forwarded) {
                    secrets.push(forwarded.clone());
                }
            }

            let candidate = StepDefinition {
                name: format!("{} / {}", step.name, inner.name),
                run: inner.run.as_deref().map(|r| ctx.interpolate(r)),
                with: ctx.interpolate_map(&inner.with),
                env,
                secrets,
                working_directory: inner
                    .working_directory
                    .as_deref()
                    .map(|d| ctx.interpolate(d))
                    .or_else(|| step.working_directory.clone()),
                continue_on_error: inner.continue_on_error || step.continue_on_error,
                ..inner.clone()
            };
            inlined.extend(self.expand_step(&candidate, grants, depth + 1)?);
        }

        debug!(action = %reference, steps = inlined.len(), "Expanded composite action");
        Ok(inlined)
    }
}

fn check_scope(step: &StepDefinition, grants: &BTreeSet<String>) -> Result<()> {
    match step.secrets.iter().find(|s| !grants.contains(*s)) {
        Some(secret) => Err(ResolutionError::SecretOutOfScope {
            step: step.name.clone(),
            secret: secret.clone(),
        }),
        None => Ok(()),
    }
}

fn bind_inputs(
    action: &CompositeAction,
    reference: &str,
    supplied: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    if let Some(unknown) = supplied.keys().find(|k| !action.inputs.contains_key(*k)) {
        return Err(mismatch(reference, unknown, "input is not declared by the action"));
    }

    let mut bound = BTreeMap::new();
    for (name, spec) in &action.inputs {
        let value = match (supplied.get(name), &spec.default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) if spec.required => {
                return Err(mismatch(reference, name, "required input is not bound"));
            }
            (None, None) => String::new(),
        };
        bound.insert(name.clone(), value);
    }
    Ok(bound)
}

fn check_input_references(action: &CompositeAction, reference: &str, step: &StepDefinition) -> Result<()> {
    let texts = step
        .run
        .iter()
        .chain(step.with.values())
        .chain(step.env.values())
        .chain(step.working_directory.iter());
    for text in texts {
        if let Some(name) = input_references(text)
            .into_iter()
            .find(|name| !action.inputs.contains_key(*name))
        {
            return Err(mismatch(reference, name, "referenced input is not declared"));
        }
    }
    Ok(())
}

fn mismatch(reference: &str, input: &str, reason: &str) -> ResolutionError {
    ResolutionError::InputMismatch {
        action: reference.to_string(),
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::loader::{Format, load_action_str};
    use pretty_assertions::assert_eq;

    const SETUP_NODE: &str = r#"
name: setup-node
version: v4
inputs:
  node-version:
    required: true
  registry:
    default: https://registry.npmjs.org
steps:
  - name: install
    run: nvm install ${{ inputs.node-version }}
    shell: bash
  - name: configure
    run: npm config set registry ${{ inputs.registry }}
    shell: bash
    secrets: [NPM_TOKEN]
"#;

    fn catalog_with(source: &str, reference: &str) -> Catalog {
        let catalog = Catalog::new();
        let action = load_action_str(source, Format::Yaml).unwrap();
        catalog
            .publish_action(VersionedRef::parse(reference).unwrap(), action)
            .unwrap();
        catalog
    }

    fn grants(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn use_step(with: &[(&str, &str)]) -> StepDefinition {
        let mut step = StepDefinition::uses("setup", "actions/setup-node@v4");
        step.with = with
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        step
    }

    #[test]
    fn test_expand_substitutes_inputs() {
        let catalog = catalog_with(SETUP_NODE, "actions/setup-node@v4");
        let resolver = CompositeResolver::new(&catalog);

        let steps = resolver
            .expand(&use_step(&[("node-version", "20")]), &grants(&["NPM_TOKEN"]))
            .unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "setup / install");
        assert_eq!(steps[0].run.as_deref(), Some("nvm install 20"));
        assert_eq!(steps[0].shell.as_deref(), Some("bash"));
        assert_eq!(
            steps[1].run.as_deref(),
            Some("npm config set registry https://registry.npmjs.org")
        );
    }

    #[test]
    fn test_secrets_are_additive() {
        let catalog = catalog_with(SETUP_NODE, "actions/setup-node@v4");
        let resolver = CompositeResolver::new(&catalog);
        let mut step = use_step(&[("node-version", "20")]);
        step.secrets = vec!["SIGNING_KEY".to_string()];

        let steps = resolver
            .expand(&step, &grants(&["NPM_TOKEN", "SIGNING_KEY"]))
            .unwrap();
        assert_eq!(steps[0].secrets, vec!["SIGNING_KEY"]);
        assert_eq!(steps[1].secrets, vec!["NPM_TOKEN", "SIGNING_KEY"]);
    }

    #[test]
    fn test_inlined_secret_must_be_granted() {
        let catalog = catalog_with(SETUP_NODE, "actions/setup-node@v4");
        let resolver = CompositeResolver::new(&catalog);
        let err = resolver
            .expand(&use_step(&[("node-version", "20")]), &grants(&[]))
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::SecretOutOfScope {
                step: "setup / configure".to_string(),
                secret: "NPM_TOKEN".to_string(),
            }
        );
    }

    #[test]
    fn test_input_mismatches() {
        let catalog = catalog_with(SETUP_NODE, "actions/setup-node@v4");
        let resolver = CompositeResolver::new(&catalog);
        let all = grants(&["NPM_TOKEN"]);

        let missing = resolver.expand(&use_step(&[]), &all).unwrap_err();
        assert!(matches!(missing, ResolutionError::InputMismatch { ref input, .. } if input == "node-version"));

        let unknown = resolver
            .expand(&use_step(&[("node-version", "20"), ("cache", "npm")]), &all)
            .unwrap_err();
        assert!(matches!(unknown, ResolutionError::InputMismatch { ref input, .. } if input == "cache"));
    }

    #[test]
    fn test_shell_must_be_declared() {
        let catalog = catalog_with(
            "name: lint\nversion: v1\nsteps:\n  - name: eslint\n    run: npx eslint .\n",
            "actions/lint@v1",
        );
        let resolver = CompositeResolver::new(&catalog);
        let err = resolver
            .expand(&StepDefinition::uses("lint", "actions/lint@v1"), &grants(&[]))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::ShellNotDeclared { .. }));
    }

    #[test]
    fn test_missing_action() {
        let catalog = Catalog::new();
        let resolver = CompositeResolver::new(&catalog);
        let err = resolver
            .expand(&StepDefinition::uses("x", "actions/none@v1"), &grants(&[]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Action not found: actions/none@v1");
    }

    #[test]
    fn test_self_reference_hits_depth_limit() {
        let catalog = catalog_with(
            "name: loop\nversion: v1\nsteps:\n  - name: again\n    uses: actions/loop@v1\n",
            "actions/loop@v1",
        );
        let resolver = CompositeResolver::new(&catalog).with_max_depth(3);
        let err = resolver
            .expand(&StepDefinition::uses("loop", "actions/loop@v1"), &grants(&[]))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NestingTooDeep { limit: 3, .. }));
    }

    #[test]
    fn test_run_and_publish_steps_pass_through() {
        let catalog = Catalog::new();
        let resolver = CompositeResolver::new(&catalog);
        let steps = vec![
            StepDefinition::run("test", "npm test"),
            StepDefinition::uses("publish", gantry_core::workflow::PUBLISH_ACTION),
        ];
        let expanded = resolver.expand_steps(&steps, &grants(&[])).unwrap();
        assert_eq!(expanded, steps);
    }
}
