//! Change tracker: diffs and before/after metrics.
//!
//! Everything here is a pure function of its inputs; nothing is cached between
//! calls, so metrics can always be recomputed from the two code strings.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use similar::{capture_diff_slices, group_diff_ops, Algorithm, DiffOp, DiffTag};

use crate::models::AgentAnalysis;
use crate::session::RefactorMetrics;

/// Context lines around each hunk of [`diff`].
pub const DIFF_CONTEXT: usize = 3;

static BRANCH_PATTERN: OnceLock<Regex> = OnceLock::new();
static ISSUE_PATTERNS: OnceLock<RegexSet> = OnceLock::new();

fn branch_pattern() -> &'static Regex {
    BRANCH_PATTERN.get_or_init(|| {
        Regex::new(r"\b(if|elif|for|while|except|case)\b").expect("branch pattern is valid")
    })
}

fn issue_patterns() -> &'static RegexSet {
    ISSUE_PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"\b(eval|exec)\s*\(",
            r#"(?i)\b(password|passwd|api_key|apikey|secret)\s*=\s*["'][^"']+["']"#,
            r#"\.execute\s*\([^)]*["']\s*%"#,
            r"os\.system\s*\([^)]*\+",
            r"\brange\s*\(\s*len\s*\(",
            r"[=!]=\s*None\b",
            r"[ \t]+$",
        ])
        .expect("issue patterns are valid")
    })
}

/// Count branching constructs in `code`.
pub fn complexity(code: &str) -> usize {
    branch_pattern().find_iter(code).count()
}

/// Count lines of `code` matching a known issue pattern, once per pattern.
pub fn count_issues(code: &str) -> usize {
    code.split('\n')
        .map(|line| issue_patterns().matches(line).iter().count())
        .sum()
}

/// Number of changed lines: for every changed block, the larger of lines
/// removed and lines added.
pub fn lines_changed(original: &str, modified: &str) -> usize {
    let old: Vec<&str> = original.split('\n').collect();
    let new: Vec<&str> = modified.split('\n').collect();

    let mut total = 0;
    let (mut deleted, mut inserted) = (0, 0);
    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            total += deleted.max(inserted);
            deleted = 0;
            inserted = 0;
        } else {
            deleted += old_range.len();
            inserted += new_range.len();
        }
    }
    total + deleted.max(inserted)
}

/// Unified diff from `original` to `modified`; empty when they are equal.
pub fn diff(original: &str, modified: &str) -> String {
    if original == modified {
        return String::new();
    }
    let old: Vec<&str> = original.split('\n').collect();
    let new: Vec<&str> = modified.split('\n').collect();
    let ops = capture_diff_slices(Algorithm::Myers, &old, &new);

    let mut out = String::from("--- original\n+++ modified\n");
    for hunk in group_diff_ops(ops, DIFF_CONTEXT) {
        write_hunk(&mut out, &hunk, &old, &new);
    }
    out
}

/// Before/after metrics for a session.
///
/// `issues_fixed` pairs each agent's analysis of `original` with the same
/// agent's analysis of `modified` and sums what disappeared. Without any
/// such pair the built-in detector is run on both strings. Unchanged code
/// fixes nothing.
pub fn metrics(
    original: &str,
    modified: &str,
    initial_analysis: &[AgentAnalysis],
    final_analysis: &[AgentAnalysis],
) -> RefactorMetrics {
    RefactorMetrics {
        lines_changed: lines_changed(original, modified),
        complexity_delta: complexity(modified) as i64 - complexity(original) as i64,
        issues_fixed: issues_fixed(original, modified, initial_analysis, final_analysis),
        ..Default::default()
    }
}

fn issues_fixed(
    original: &str,
    modified: &str,
    initial_analysis: &[AgentAnalysis],
    final_analysis: &[AgentAnalysis],
) -> usize {
    if original == modified {
        return 0;
    }
    let mut paired = false;
    let mut fixed = 0;
    for before in initial_analysis {
        if let Some(after) = final_analysis.iter().find(|a| a.agent_id == before.agent_id) {
            paired = true;
            fixed += before.issues_found.saturating_sub(after.issues_found);
        }
    }
    if paired {
        fixed
    } else {
        count_issues(original).saturating_sub(count_issues(modified))
    }
}

fn write_hunk(out: &mut String, hunk: &[DiffOp], old: &[&str], new: &[&str]) {
    let (Some(first), Some(last)) = (hunk.first(), hunk.last()) else {
        return;
    };
    let old_lines = first.old_range().start..last.old_range().end;
    let new_lines = first.new_range().start..last.new_range().end;
    let start = |range: &std::ops::Range<usize>| {
        if range.is_empty() {
            range.start
        } else {
            range.start + 1
        }
    };

    let _ = writeln!(
        out,
        "@@ -{},{} +{},{} @@",
        start(&old_lines),
        old_lines.len(),
        start(&new_lines),
        new_lines.len()
    );
    for op in hunk {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            for line in &old[old_range] {
                let _ = writeln!(out, " {}", line);
            }
            continue;
        }
        for line in &old[old_range] {
            let _ = writeln!(out, "-{}", line);
        }
        for line in &new[new_range] {
            let _ = writeln!(out, "+{}", line);
        }
    }
}
