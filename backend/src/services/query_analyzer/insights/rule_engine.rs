//! Rule engine for query insights
//!
//! Runs every catalog rule in isolation and ranks the findings.

use super::rules::get_all_rules;
use super::{InsightContext, InsightRule};
use crate::services::query_analyzer::models::{Insight, RuleFailure};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};

/// Ranked insights plus the rules that could not be evaluated
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightReport {
    pub insights: Vec<Insight>,
    pub rule_failures: Vec<RuleFailure>,
}

pub struct RuleEngine {
    rules: Vec<Box<dyn InsightRule>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { rules: get_all_rules() }
    }

    /// Custom rule set (used in tests)
    #[cfg(test)]
    pub fn with_rules(rules: Vec<Box<dyn InsightRule>>) -> Self {
        Self { rules }
    }

    pub fn evaluate(&self, ctx: &InsightContext) -> InsightReport {
        let mut report = InsightReport::default();

        for rule in &self.rules {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(ctx)));

            match outcome {
                Ok(Ok(Some(insight))) => report.insights.push(insight),
                Ok(Ok(None)) => {},
                Ok(Err(e)) => {
                    tracing::warn!("Insight rule {} failed: {}", rule.id(), e);
                    report.rule_failures.push(RuleFailure {
                        rule_id: rule.id().to_string(),
                        message: e.to_string(),
                    });
                },
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Insight rule {} panicked: {}", rule.id(), message);
                    report.rule_failures.push(RuleFailure {
                        rule_id: rule.id().to_string(),
                        message: format!("panic: {}", message),
                    });
                },
            }
        }

        // Stable: equal keys keep catalog order
        report.insights.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.affected_count.cmp(&a.affected_count))
        });

        tracing::info!(
            "Evaluated {} insight rules: {} findings, {} failures",
            self.rules.len(),
            report.insights.len(),
            report.rule_failures.len()
        );
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
