//! Loop simplification agent.
//!
//! Rewrites index loops of the form `for i in range(len(xs))` into
//! `enumerate`, replacing `xs[i]` reads in the loop body with the element.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use snre_core::{AgentAnalysis, Change, ChangeId, ChangeKind, RefactorAgent};

use crate::common::{ballot, block_end};

pub const LOOP_SIMPLIFIER_ID: &str = "loop_simplifier";

static RANGE_LEN: OnceLock<Regex> = OnceLock::new();
static NESTED_APPEND: OnceLock<Regex> = OnceLock::new();
static WHILE_BREAK: OnceLock<Regex> = OnceLock::new();
static LOOP_KEYWORD: OnceLock<Regex> = OnceLock::new();
static ITEM_NAME: OnceLock<Regex> = OnceLock::new();

fn range_len() -> &'static Regex {
    RANGE_LEN.get_or_init(|| {
        Regex::new(r"\bfor\s+(\w+)\s+in\s+range\(\s*len\(\s*(\w+)\s*\)\s*\)")
            .expect("range-len pattern is valid")
    })
}

fn nested_append() -> &'static Regex {
    NESTED_APPEND.get_or_init(|| {
        Regex::new(r"\bfor\b[^\n]*\n[^\n]*\bfor\b[^\n]*\n[^\n]*\.append\(")
            .expect("nested-append pattern is valid")
    })
}

fn while_break() -> &'static Regex {
    WHILE_BREAK.get_or_init(|| {
        Regex::new(r"\bwhile\s+True\b[^\n]*\n[^\n]*\bif\b[^\n]*\n?[^\n]*\bbreak\b")
            .expect("while-break pattern is valid")
    })
}

fn loop_keyword() -> &'static Regex {
    LOOP_KEYWORD.get_or_init(|| Regex::new(r"\b(for|while)\b").expect("loop pattern is valid"))
}

fn item_name() -> &'static Regex {
    ITEM_NAME.get_or_init(|| Regex::new(r"\bitem\b").expect("item pattern is valid"))
}

/// Agent simplifying index-based loops.
#[derive(Debug, Default)]
pub struct LoopSimplifier;

impl LoopSimplifier {
    pub fn new() -> Self {
        Self
    }

    fn count_loops(code: &str) -> usize {
        loop_keyword().find_iter(code).count()
    }

    /// Rewrite the loop opened by `lines[start]`, or `None` if it is not a
    /// `range(len(..))` loop.
    fn rewrite_block(lines: &[&str], start: usize) -> Option<(usize, String)> {
        let caps = range_len().captures(lines[start])?;
        let whole = caps.get(0)?;
        let (index, seq) = (&caps[1], &caps[2]);

        let end = block_end(lines, start);
        let block = lines[start..end].join("\n");
        let element = if item_name().is_match(&block) {
            format!("{seq}_item")
        } else {
            "item".to_string()
        };

        let header = format!(
            "{}for {index}, {element} in enumerate({seq}){}",
            &lines[start][..whole.start()],
            &lines[start][whole.end()..]
        );
        let mut rewritten = std::iter::once(header)
            .chain(lines[start + 1..end].iter().map(|l| l.to_string()))
            .collect::<Vec<_>>()
            .join("\n");

        let access = Regex::new(&format!(
            r"\b{}\s*\[\s*{}\s*\]",
            regex::escape(seq),
            regex::escape(index)
        ))
        .ok()?;
        let store = Regex::new(&format!(r"{}\s*=[^=]", access.as_str())).ok()?;
        // Element writes must keep the index form.
        if !store.is_match(&rewritten) {
            rewritten = access.replace_all(&rewritten, element.as_str()).into_owned();
        }
        Some((end, rewritten))
    }
}

impl RefactorAgent for LoopSimplifier {
    fn id(&self) -> &str {
        LOOP_SIMPLIFIER_ID
    }

    fn analyze(&self, code: &str) -> anyhow::Result<AgentAnalysis> {
        let mut analysis = AgentAnalysis::new(LOOP_SIMPLIFIER_ID);
        for line in code.split('\n').filter(|l| range_len().is_match(l)) {
            analysis = analysis
                .with_pattern("range_len_pattern")
                .with_suggestion(format!("Use enumerate() in: {}", line.trim()));
        }
        if nested_append().is_match(code) {
            analysis = analysis
                .with_pattern("nested_loop_with_append")
                .with_suggestion("Consider a list comprehension for the nested append loop");
        }
        if while_break().is_match(code) {
            analysis = analysis.with_pattern("infinite_loop_with_break");
        }
        if code.matches("for ").count() > 3 {
            analysis = analysis.with_pattern("excessive_nested_loops");
        }
        Ok(analysis)
    }

    fn suggest_changes(&self, code: &str) -> anyhow::Result<Vec<Change>> {
        let lines: Vec<&str> = code.split('\n').collect();
        let mut changes = Vec::new();
        for start in 0..lines.len() {
            let Some((end, rewritten)) = Self::rewrite_block(&lines, start) else {
                continue;
            };
            let change = Change::new(
                LOOP_SIMPLIFIER_ID,
                ChangeKind::StructuralSimplification,
                start..end,
                lines[start..end].join("\n"),
                rewritten,
                0.9,
            )?
            .with_rationale("Replace range(len()) loop with enumerate()");
            changes.push(change);
        }
        debug!(agent_id = LOOP_SIMPLIFIER_ID, proposals = changes.len(), "Loop scan complete");
        Ok(changes)
    }

    fn vote(&self, changes: &[Change]) -> anyhow::Result<HashMap<ChangeId, f64>> {
        Ok(ballot(changes, |change| {
            let loop_related = change.kind() == ChangeKind::StructuralSimplification
                || change.rationale().to_lowercase().contains("loop");
            if loop_related {
                change.confidence() * 1.3
            } else {
                change.confidence() * 0.6
            }
        }))
    }

    fn validate_result(&self, original: &str, modified: &str) -> bool {
        Self::count_loops(modified) <= Self::count_loops(original)
    }
}
