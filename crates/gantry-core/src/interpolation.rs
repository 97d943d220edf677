//! `${{ … }}` substitution.
//!
//! Substitution is partial: an expression whose namespace is not bound in the
//! context is left verbatim so a later planning stage can resolve it. Composite
//! expansion binds `inputs`, matrix expansion binds `matrix`, and run planning
//! binds `workflow`, `ref` and `event`.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("valid expression regex"));

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    pub inputs: Option<BTreeMap<String, String>>,
    pub matrix: Option<BTreeMap<String, String>>,
    pub workflow: Option<String>,
    pub git_ref: Option<String>,
    pub event: Option<String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, String>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_matrix(mut self, matrix: BTreeMap<String, String>) -> Self {
        self.matrix = Some(matrix);
        self
    }

    pub fn with_run(
        mut self,
        workflow: impl Into<String>,
        git_ref: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        self.workflow = Some(workflow.into());
        self.git_ref = Some(git_ref.into());
        self.event = Some(event.into());
        self
    }

    /// Interpolate every bound expression in a string.
    ///
    /// Supports:
    /// - `${{ inputs.name }}`
    /// - `${{ matrix.axis }}`
    /// - `${{ workflow }}`, `${{ ref }}`, `${{ event }}`
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    fn resolve_expression(&self, expr: &str) -> Option<String> {
        if let Some(name) = expr.strip_prefix("inputs.") {
            return self.inputs.as_ref()?.get(name).cloned();
        }
        if let Some(axis) = expr.strip_prefix("matrix.") {
            return self.matrix.as_ref()?.get(axis).cloned();
        }
        match expr {
            "workflow" => self.workflow.clone(),
            "ref" => self.git_ref.clone(),
            "event" => self.event.clone(),
            _ => None,
        }
    }
}

/// All `${{ … }}` expressions in a string, trimmed.
pub fn expressions(input: &str) -> Vec<&str> {
    EXPRESSION
        .captures_iter(input)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .collect()
}

/// Names referenced as `${{ inputs.<name> }}` in a string.
pub fn input_references(input: &str) -> Vec<&str> {
    expressions(input)
        .into_iter()
        .filter_map(|expr| expr.strip_prefix("inputs."))
        .collect()
}

/// Render a definition value the way it appears in commands and leg names:
/// strings unquoted, everything else as JSON.
pub fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
