//! DAG over the concrete job instances of a run plan.

use crate::plan::RunPlan;
use gantry_core::{DefinitionError, JobKey};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Directed acyclic graph of job instances. Edges point from upstream to dependent.
#[derive(Debug)]
pub struct JobGraph {
    graph: DiGraph<JobKey, ()>,
    index: HashMap<JobKey, NodeIndex>,
}

impl JobGraph {
    /// Build the graph for a plan.
    pub fn build(plan: &RunPlan) -> Result<Self, DefinitionError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for job in &plan.jobs {
            let idx = graph.add_node(job.key.clone());
            if index.insert(job.key.clone(), idx).is_some() {
                return Err(DefinitionError::DuplicateJobKey {
                    key: job.key.to_string(),
                });
            }
        }

        for job in &plan.jobs {
            let job_idx = index[&job.key];
            for need in &job.needs {
                let need_idx =
                    index
                        .get(need)
                        .ok_or_else(|| DefinitionError::UnknownReference {
                            location: format!("jobs.{}.needs", job.job),
                            reference: need.to_string(),
                        })?;
                graph.add_edge(*need_idx, job_idx, ());
            }
        }

        let dag = Self { graph, index };
        dag.topological_order()?;
        Ok(dag)
    }

    /// Direct upstreams of `key`.
    pub fn predecessors(&self, key: &JobKey) -> Vec<&JobKey> {
        self.index
            .get(key)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn topological_order(&self) -> Result<Vec<&JobKey>, DefinitionError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|cycle| DefinitionError::CyclicDependency {
                job: self
                    .graph
                    .node_weight(cycle.node_id())
                    .map(|k| k.to_string())
                    .unwrap_or_default(),
            })
    }

    /// Jobs grouped by depth: every job's upstreams are in earlier levels.
    pub fn levels(&self) -> Vec<Vec<&JobKey>> {
        let Ok(order) = toposort(&self.graph, None) else {
            return Vec::new();
        };
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut levels: Vec<Vec<&JobKey>> = Vec::new();

        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|p| depth.get(&p))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            if let Some(key) = self.graph.node_weight(idx) {
                levels[level].push(key);
            }
        }
        for level in &mut levels {
            level.sort();
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::plan::{Planner, PlannerConfig};
    use gantry_core::loader::load_str;
    use gantry_core::run::TriggerEvent;

    const PIPELINE: &str = r#"
name: pipeline
jobs:
  build:
    runs_on: linux
    steps: [{name: build, run: make}]
  test-unit:
    runs_on: linux
    needs: [build]
    matrix:
      axes:
        shard: [1, 2]
    steps: [{name: test, run: make test}]
  test-integration:
    runs_on: linux
    needs: [build]
    steps: [{name: test, run: make it}]
  deploy:
    runs_on: linux
    needs: [test-unit, test-integration]
    steps: [{name: deploy, run: make deploy}]
"#;

    fn graph() -> JobGraph {
        let catalog = Catalog::new();
        let plan = Planner::new(&catalog, PlannerConfig::default())
            .plan(&load_str(PIPELINE).unwrap(), &TriggerEvent::push("main"))
            .unwrap();
        JobGraph::build(&plan).unwrap()
    }

    #[test]
    fn test_predecessors_span_matrix_legs() {
        let dag = graph();
        assert_eq!(dag.topological_order().unwrap().len(), 5);

        let mut upstream: Vec<String> = dag
            .predecessors(&JobKey::new("deploy"))
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        upstream.sort();
        assert_eq!(
            upstream,
            vec!["test-integration", "test-unit (shard=1)", "test-unit (shard=2)"]
        );
        assert!(dag.predecessors(&JobKey::new("build")).is_empty());
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let catalog = Catalog::new();
        let mut plan = Planner::new(&catalog, PlannerConfig::default())
            .plan(&load_str(PIPELINE).unwrap(), &TriggerEvent::push("main"))
            .unwrap();
        let copy = plan.jobs[0].clone();
        plan.jobs.push(copy);

        assert!(matches!(
            JobGraph::build(&plan),
            Err(DefinitionError::DuplicateJobKey { key }) if key == "build"
        ));
    }

    #[test]
    fn test_levels() {
        let levels: Vec<Vec<String>> = graph()
            .levels()
            .into_iter()
            .map(|l| l.into_iter().map(|k| k.to_string()).collect())
            .collect();
        assert_eq!(
            levels,
            vec![
                vec!["build".to_string()],
                vec![
                    "test-integration".to_string(),
                    "test-unit (shard=1)".to_string(),
                    "test-unit (shard=2)".to_string(),
                ],
                vec!["deploy".to_string()],
            ]
        );
    }
}
