//! Trigger matching and evaluation.

use chrono::{DateTime, Utc};
use cron::Schedule;
use gantry_core::run::TriggerEvent;
use gantry_core::workflow::{EventKind, TriggerConfig, WorkflowDefinition};
use std::str::FromStr;
use tracing::warn;

/// Matcher for determining if a workflow should be activated by an event.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a workflow should be triggered by an event. A definition
    /// without triggers is never activated by events.
    pub fn matches(&self, definition: &WorkflowDefinition, event: &TriggerEvent) -> bool {
        definition
            .triggers
            .iter()
            .any(|trigger| self.trigger_matches(trigger, event))
    }

    fn trigger_matches(&self, trigger: &TriggerConfig, event: &TriggerEvent) -> bool {
        let git_ref = event.short_ref();
        match event.effective_kind() {
            EventKind::Push => {
                trigger.event == EventKind::Push
                    && !(trigger.branches.is_empty() && !trigger.tags.is_empty())
                    && self.any_match(&trigger.branches, git_ref)
            }
            EventKind::TagPush => match trigger.event {
                EventKind::TagPush => self.any_match(&trigger.tags, git_ref),
                // `push` with tag filters also covers tag pushes
                EventKind::Push => {
                    !trigger.tags.is_empty() && self.any_match(&trigger.tags, git_ref)
                }
                _ => false,
            },
            EventKind::PullRequest => {
                trigger.event == EventKind::PullRequest
                    && self.any_match(&trigger.branches, git_ref)
            }
            EventKind::Schedule => {
                trigger.event == EventKind::Schedule && self.schedule_matches(trigger, event)
            }
            kind @ (EventKind::Manual | EventKind::WorkflowCall) => trigger.event == kind,
        }
    }

    fn schedule_matches(&self, trigger: &TriggerConfig, event: &TriggerEvent) -> bool {
        match (&trigger.cron, &event.schedule) {
            (Some(expected), Some(fired)) => {
                if parse_cron(expected).is_none() {
                    warn!(cron = %expected, "Ignoring schedule trigger with invalid cron expression");
                    return false;
                }
                expected.trim() == fired.trim()
            }
            _ => true,
        }
    }

    /// Empty pattern lists match everything.
    fn any_match(&self, patterns: &[String], text: &str) -> bool {
        patterns.is_empty() || patterns.iter().any(|p| glob_match(p, text))
    }

    /// Next time any schedule trigger of the definition fires after `after`.
    pub fn next_scheduled(
        &self,
        definition: &WorkflowDefinition,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        definition
            .triggers
            .iter()
            .filter(|t| t.event == EventKind::Schedule)
            .filter_map(|t| parse_cron(t.cron.as_deref()?))
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a five-field cron expression (or the six/seven-field form with seconds).
pub fn parse_cron(expression: &str) -> Option<Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };
    Schedule::from_str(&normalized).ok()
}

/// Branch/tag globbing: `*`, `**`, `prefix/*`, `prefix/**`, and one inner `*`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'));
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{prefix}/");
        return text
            .strip_prefix(&prefix_slash)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
    }
    if let Some((head, tail)) = pattern.split_once('*')
        && !tail.contains('*')
    {
        return text.len() >= head.len() + tail.len()
            && text.starts_with(head)
            && text.ends_with(tail);
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(triggers: Vec<TriggerConfig>) -> WorkflowDefinition {
        let mut def = gantry_core::loader::load_str(
            "name: wf\njobs:\n  a:\n    runs_on: linux\n    steps:\n      - name: s\n        run: echo\n",
        )
        .unwrap();
        def.triggers = triggers;
        def
    }

    fn trigger(event: EventKind, branches: &[&str], tags: &[&str]) -> TriggerConfig {
        TriggerConfig {
            event,
            branches: branches.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            cron: None,
        }
    }

    #[test]
    fn test_branch_match_exact() {
        assert!(glob_match("main", "main"));
        assert!(!glob_match("main", "develop"));
    }

    #[test]
    fn test_branch_match_glob() {
        assert!(glob_match("feature/*", "feature/foo"));
        assert!(!glob_match("feature/*", "feature/foo/bar"));
        assert!(glob_match("release/**", "release/v1/hotfix"));
        assert!(glob_match("v*", "v1.2.0"));
        assert!(glob_match("v*-rc", "v2-rc"));
        assert!(!glob_match("v*-rc", "v2"));
    }

    #[test]
    fn test_push_trigger_ignores_tags() {
        let matcher = TriggerMatcher::new();
        let ci = definition(vec![trigger(EventKind::Push, &["main"], &[])]);
        assert!(matcher.matches(&ci, &TriggerEvent::push("refs/heads/main")));
        assert!(!matcher.matches(&ci, &TriggerEvent::push("develop")));
        assert!(!matcher.matches(&ci, &TriggerEvent::tag("v1.0.0")));
    }

    #[test]
    fn test_tagged_push_counts_as_tag_push() {
        let matcher = TriggerMatcher::new();
        let release = definition(vec![trigger(EventKind::TagPush, &[], &["v*"])]);
        let mut event = TriggerEvent::push("refs/tags/v1.2.0");
        assert!(!matcher.matches(&release, &event));
        event.is_tag = true;
        assert!(matcher.matches(&release, &event));
    }

    #[test]
    fn test_push_with_tag_filters() {
        let matcher = TriggerMatcher::new();
        let def = definition(vec![trigger(EventKind::Push, &[], &["v*"])]);
        assert!(matcher.matches(&def, &TriggerEvent::tag("v3")));
        assert!(!matcher.matches(&def, &TriggerEvent::push("main")));
    }

    #[test]
    fn test_pull_request_matches_target_branch() {
        let matcher = TriggerMatcher::new();
        let def = definition(vec![trigger(EventKind::PullRequest, &["main"], &[])]);
        let event = TriggerEvent::new(EventKind::PullRequest, "main");
        assert!(matcher.matches(&def, &event));
        assert!(!matcher.matches(&def, &TriggerEvent::push("main")));
    }

    #[test]
    fn test_no_triggers_never_match() {
        let matcher = TriggerMatcher::new();
        assert!(!matcher.matches(&definition(vec![]), &TriggerEvent::push("main")));
    }

    #[test]
    fn test_schedule_matches_cron() {
        let matcher = TriggerMatcher::new();
        let mut nightly = trigger(EventKind::Schedule, &[], &[]);
        nightly.cron = Some("0 3 * * *".to_string());
        let def = definition(vec![nightly]);

        assert!(matcher.matches(&def, &TriggerEvent::scheduled("0 3 * * *", "main")));
        assert!(!matcher.matches(&def, &TriggerEvent::scheduled("0 4 * * *", "main")));

        let after = "2026-01-01T00:00:00Z".parse().unwrap();
        let next = matcher.next_scheduled(&def, after).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-01-01T03:00:00+00:00");
    }

    #[test]
    fn test_invalid_cron_never_matches() {
        let matcher = TriggerMatcher::new();
        let mut bad = trigger(EventKind::Schedule, &[], &[]);
        bad.cron = Some("whenever".to_string());
        let def = definition(vec![bad]);
        assert!(!matcher.matches(&def, &TriggerEvent::scheduled("whenever", "main")));
    }
}
