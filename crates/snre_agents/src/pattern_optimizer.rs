//! Pattern normalization agent: `None` comparisons and trailing whitespace.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use snre_core::{AgentAnalysis, Change, ChangeId, ChangeKind, RefactorAgent};

use crate::common::{ballot, line_change};

pub const PATTERN_OPTIMIZER_ID: &str = "pattern_optimizer";

static NONE_EQ: OnceLock<Regex> = OnceLock::new();
static NONE_NE: OnceLock<Regex> = OnceLock::new();

fn none_eq() -> &'static Regex {
    NONE_EQ.get_or_init(|| Regex::new(r"\s*==\s*None\b").expect("none pattern is valid"))
}

fn none_ne() -> &'static Regex {
    NONE_NE.get_or_init(|| Regex::new(r"\s*!=\s*None\b").expect("none pattern is valid"))
}

/// Agent normalizing small style patterns.
#[derive(Debug, Default)]
pub struct PatternOptimizer;

impl PatternOptimizer {
    pub fn new() -> Self {
        Self
    }

    fn none_comparisons(code: &str) -> usize {
        none_eq().find_iter(code).count() + none_ne().find_iter(code).count()
    }

    fn fix_none_comparison(line: &str) -> Option<String> {
        if !none_eq().is_match(line) && !none_ne().is_match(line) {
            return None;
        }
        let fixed = none_eq().replace_all(line, " is None");
        Some(none_ne().replace_all(&fixed, " is not None").into_owned())
    }
}

impl RefactorAgent for PatternOptimizer {
    fn id(&self) -> &str {
        PATTERN_OPTIMIZER_ID
    }

    fn analyze(&self, code: &str) -> anyhow::Result<AgentAnalysis> {
        let lines: Vec<&str> = code.split('\n').collect();
        let mut analysis = AgentAnalysis::new(PATTERN_OPTIMIZER_ID);
        for (idx, line) in lines.iter().enumerate() {
            if none_eq().is_match(line) || none_ne().is_match(line) {
                analysis = analysis
                    .with_pattern("none_comparison")
                    .with_suggestion(format!("line {}: compare with None using `is`", idx + 1));
            }
            if line.len() != line.trim_end().len() {
                analysis = analysis.with_pattern("trailing_whitespace");
            }
            let next_appends = lines.get(idx + 1).is_some_and(|n| n.contains(".append("));
            if line.trim_start().starts_with("for ") && next_appends {
                analysis = analysis.with_pattern("list_comprehension_opportunity");
            }
            let trimmed = line.trim_start();
            if trimmed.starts_with("temp_") || trimmed.starts_with("tmp_") {
                analysis = analysis.with_pattern("unnecessary_temp_variable");
            }
        }
        Ok(analysis)
    }

    fn suggest_changes(&self, code: &str) -> anyhow::Result<Vec<Change>> {
        let lines: Vec<&str> = code.split('\n').collect();
        let mut changes = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(fixed) = Self::fix_none_comparison(line) {
                changes.push(line_change(
                    PATTERN_OPTIMIZER_ID,
                    ChangeKind::StyleNormalization,
                    &lines,
                    idx,
                    fixed,
                    0.85,
                    "Compare with None by identity",
                )?);
            }
            let trimmed = line.trim_end();
            if trimmed.len() != line.len() {
                changes.push(line_change(
                    PATTERN_OPTIMIZER_ID,
                    ChangeKind::StyleNormalization,
                    &lines,
                    idx,
                    trimmed,
                    0.75,
                    "Strip trailing whitespace",
                )?);
            }
        }
        Ok(changes)
    }

    fn vote(&self, changes: &[Change]) -> anyhow::Result<HashMap<ChangeId, f64>> {
        Ok(ballot(changes, |change| match change.kind() {
            ChangeKind::StyleNormalization | ChangeKind::StructuralSimplification => {
                change.confidence() * 1.2
            }
            _ => change.confidence() * 0.8,
        }))
    }

    fn validate_result(&self, original: &str, modified: &str) -> bool {
        original != modified
            && Self::none_comparisons(modified) <= Self::none_comparisons(original)
    }
}
