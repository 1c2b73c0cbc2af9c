//! Helpers shared by the built-in agents.

use std::collections::HashMap;

use snre_core::{Change, ChangeId, ChangeKind};

/// Leading whitespace of `line`.
pub(crate) fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// End (exclusive) of the indented block opened by `lines[start]`.
///
/// Blank lines inside the block are included; trailing blank lines are not.
pub(crate) fn block_end(lines: &[&str], start: usize) -> usize {
    let depth = indent_of(lines[start]).len();
    let mut end = start + 1;
    for (idx, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line).len() <= depth {
            break;
        }
        end = idx + 1;
    }
    end
}

/// A one-line replacement of `lines[idx]`.
pub(crate) fn line_change(
    agent_id: &str,
    kind: ChangeKind,
    lines: &[&str],
    idx: usize,
    replacement: impl Into<String>,
    confidence: f64,
    rationale: &str,
) -> anyhow::Result<Change> {
    Ok(Change::new(agent_id, kind, idx..idx + 1, lines[idx], replacement, confidence)?
        .with_rationale(rationale))
}

/// Score every change with `score`, clamped into `[0.0, 1.0]`.
pub(crate) fn ballot(changes: &[Change], score: impl Fn(&Change) -> f64) -> HashMap<ChangeId, f64> {
    changes
        .iter()
        .map(|change| (change.id(), score(change).clamp(0.0, 1.0)))
        .collect()
}
