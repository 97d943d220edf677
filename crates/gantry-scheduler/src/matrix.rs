//! Matrix expansion for parallel job generation.

use gantry_core::interpolation::value_to_string;
use gantry_core::workflow::JobDefinition;
use gantry_core::{FamilyId, JobKey};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single leg of an expanded matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixLeg {
    pub key: JobKey,
    pub index: usize,
    pub values: BTreeMap<String, Value>,
}

impl MatrixLeg {
    /// Values rendered for `${{ matrix.* }}` substitution.
    pub fn context(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(axis, value)| (axis.clone(), value_to_string(value)))
            .collect()
    }
}

/// Result of matrix expansion.
#[derive(Debug, Clone)]
pub struct MatrixExpansion {
    pub family: FamilyId,
    pub job: String,
    pub legs: Vec<MatrixLeg>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job's matrix into legs: the cartesian product of the axes,
    /// minus `exclude` matches, plus `include` entries not already present.
    pub fn expand(&self, name: &str, job: &JobDefinition) -> Option<MatrixExpansion> {
        let matrix = job.matrix.as_ref()?;

        let mut combinations = self.generate_combinations(&matrix.axes);

        combinations.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| self.matches_partial(combo, exclude))
        });

        for include in &matrix.include {
            if !combinations.contains(include) {
                combinations.push(include.clone());
            }
        }

        let legs = combinations
            .into_iter()
            .enumerate()
            .map(|(index, values)| MatrixLeg {
                key: JobKey::new(leg_name(name, &values)),
                index,
                values,
            })
            .collect();

        Some(MatrixExpansion {
            family: FamilyId::new(),
            job: name.to_string(),
            legs,
            fail_fast: matrix.fail_fast,
            max_parallel: matrix.max_parallel,
        })
    }

    fn generate_combinations(
        &self,
        axes: &BTreeMap<String, Vec<Value>>,
    ) -> Vec<BTreeMap<String, Value>> {
        if axes.is_empty() {
            return Vec::new();
        }

        let mut result = vec![BTreeMap::new()];
        for (axis, values) in axes {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for combo in &result {
                for value in values {
                    let mut extended = combo.clone();
                    extended.insert(axis.clone(), value.clone());
                    next.push(extended);
                }
            }
            result = next;
        }
        result
    }

    fn matches_partial(
        &self,
        combo: &BTreeMap<String, Value>,
        partial: &BTreeMap<String, Value>,
    ) -> bool {
        partial
            .iter()
            .all(|(axis, value)| combo.get(axis) == Some(value))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

/// `job (axis=value, …)` with axes in sorted order.
pub fn leg_name(job: &str, values: &BTreeMap<String, Value>) -> String {
    if values.is_empty() {
        return job.to_string();
    }
    let parts: Vec<String> = values
        .iter()
        .map(|(axis, value)| format!("{axis}={}", value_to_string(value)))
        .collect();
    format!("{job} ({})", parts.join(", "))
}
