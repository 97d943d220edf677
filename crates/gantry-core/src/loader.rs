//! Loading and validating workflow definitions.

use crate::error::DefinitionError;
use crate::workflow::{CompositeAction, SecretGrant, VersionedRef, WorkflowDefinition};
use crate::Result;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Source format of a definition document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// `.json` files are JSON, everything else is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

pub fn parse<T: DeserializeOwned>(source: &str, format: Format) -> std::result::Result<T, DefinitionError> {
    match format {
        Format::Yaml => serde_yaml::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string())),
        Format::Json => serde_json::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string())),
    }
}

/// Parse and validate a YAML workflow definition.
pub fn load_str(source: &str) -> std::result::Result<WorkflowDefinition, DefinitionError> {
    load_with_format(source, Format::Yaml)
}

pub fn load_with_format(
    source: &str,
    format: Format,
) -> std::result::Result<WorkflowDefinition, DefinitionError> {
    let definition: WorkflowDefinition = parse(source, format)?;
    validate(&definition)?;
    Ok(definition)
}

/// Load and validate a workflow definition file.
pub fn load_file(path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    let definition = load_with_format(&source, Format::from_path(path))?;
    debug!(path = %path.display(), workflow = %definition.name, "Loaded workflow definition");
    Ok(definition)
}

/// Parse a composite action document.
pub fn load_action_str(
    source: &str,
    format: Format,
) -> std::result::Result<CompositeAction, DefinitionError> {
    let action: CompositeAction = parse(source, format)?;
    if action.name.is_empty() {
        return Err(missing("action", "name"));
    }
    for (index, step) in action.steps.iter().enumerate() {
        if step.action().is_none() {
            return Err(DefinitionError::ConflictingStepShape {
                location: format!("{}.steps[{index}]", action.name),
            });
        }
    }
    Ok(action)
}

fn missing(location: impl Into<String>, field: &str) -> DefinitionError {
    DefinitionError::MissingRequiredField {
        location: location.into(),
        field: field.to_string(),
    }
}

/// Check the structural invariants of a definition.
pub fn validate(definition: &WorkflowDefinition) -> std::result::Result<(), DefinitionError> {
    if definition.name.trim().is_empty() {
        return Err(missing("workflow", "name"));
    }
    if definition.jobs.is_empty() {
        return Err(missing("workflow", "jobs"));
    }

    for (name, job) in &definition.jobs {
        let location = format!("jobs.{name}");

        if job.delegates() {
            if !job.steps.is_empty() {
                return Err(DefinitionError::ConflictingJobShape { job: name.clone() });
            }
            if let Some(Err(err)) = job.reusable_ref() {
                return Err(err);
            }
        } else {
            if job.runs_on.as_deref().is_none_or(str::is_empty) {
                return Err(missing(location, "runs_on"));
            }
            if job.steps.is_empty() {
                return Err(missing(location, "steps"));
            }
        }

        for need in &job.needs {
            if !definition.jobs.contains_key(need) {
                return Err(DefinitionError::UnknownReference {
                    location: format!("{location}.needs"),
                    reference: need.clone(),
                });
            }
        }

        if let Some(matrix) = &job.matrix
            && matrix.axes.is_empty()
            && matrix.include.is_empty()
        {
            return Err(missing(format!("{location}.matrix"), "axes"));
        }

        for (index, step) in job.steps.iter().enumerate() {
            let step_location = format!("{location}.steps[{index}]");
            if step.name.trim().is_empty() {
                return Err(missing(step_location, "name"));
            }
            if step.action().is_none() {
                return Err(DefinitionError::ConflictingStepShape {
                    location: step_location,
                });
            }
            if let Some(reference) = &step.uses
                && !step.is_publish()
                && VersionedRef::parse(reference).is_none()
            {
                return Err(DefinitionError::UnknownReference {
                    location: step_location,
                    reference: reference.clone(),
                });
            }
            if let SecretGrant::Names(granted) = &job.secrets {
                for secret in &step.secrets {
                    if !granted.contains(secret) {
                        return Err(DefinitionError::UnknownReference {
                            location: format!("{step_location}.secrets"),
                            reference: secret.clone(),
                        });
                    }
                }
            }
        }
    }

    job_order(definition)?;
    Ok(())
}

/// Job names in a dependency-respecting order.
pub fn job_order(definition: &WorkflowDefinition) -> std::result::Result<Vec<String>, DefinitionError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices = HashMap::new();

    for name in definition.jobs.keys() {
        indices.insert(name.as_str(), graph.add_node(name.as_str()));
    }

    for (name, job) in &definition.jobs {
        let to = indices[name.as_str()];
        for need in &job.needs {
            let from = indices
                .get(need.as_str())
                .ok_or_else(|| DefinitionError::UnknownReference {
                    location: format!("jobs.{name}.needs"),
                    reference: need.clone(),
                })?;
            graph.add_edge(*from, to, ());
        }
    }

    toposort(&graph, None)
        .map(|order| order.into_iter().map(|idx| graph[idx].to_string()).collect())
        .map_err(|cycle| DefinitionError::CyclicDependency {
            job: graph[cycle.node_id()].to_string(),
        })
}
