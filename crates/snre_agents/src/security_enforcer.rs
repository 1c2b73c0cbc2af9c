//! Security enforcement agent.
//!
//! Scans for injection-prone calls and hardcoded credentials, and proposes
//! line-local fixes:
//! - `eval(...)` fed from `input()` becomes `ast.literal_eval(...)`
//! - `%`-formatted SQL passed to `execute` becomes a parameterized call
//! - string-literal credentials move to `os.environ.get`

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use snre_core::{AgentAnalysis, Change, ChangeId, ChangeKind, RefactorAgent};

use crate::common::{ballot, indent_of, line_change};

pub const SECURITY_ENFORCER_ID: &str = "security_enforcer";

/// Detection rules as (category, pattern); every pattern is case-insensitive.
const VULNERABILITY_PATTERNS: &[(&str, &str)] = &[
    ("sql_injection", r"cursor\.execute\([^)]*%[^)]*\)"),
    ("sql_injection", r"\.format\([^)]*\).*execute"),
    ("sql_injection", r#"f".*\{.*\}.*".*execute"#),
    ("command_injection", r"os\.system\([^)]*\+"),
    ("command_injection", r"subprocess\.[^(]*\([^)]*\+"),
    ("command_injection", r"\beval\([^)]*input"),
    ("path_traversal", r"open\([^)]*\.\./.*\)"),
    ("path_traversal", r"os\.path\.join\([^)]*\.\."),
    ("hardcoded_secrets", r#"password\s*=\s*["'][^"']*["']"#),
    ("hardcoded_secrets", r#"api_key\s*=\s*["'][^"']*["']"#),
    ("hardcoded_secrets", r#"secret\s*=\s*["'][^"']*["']"#),
];

struct Rules {
    scan: Vec<(&'static str, Regex)>,
    eval_call: Regex,
    formatted_sql: Regex,
    credential: Regex,
}

static RULES: OnceLock<Rules> = OnceLock::new();

fn rules() -> &'static Rules {
    RULES.get_or_init(|| Rules {
        scan: VULNERABILITY_PATTERNS
            .iter()
            .map(|(category, pattern)| {
                let regex = Regex::new(&format!("(?i){pattern}"))
                    .expect("vulnerability patterns are valid");
                (*category, regex)
            })
            .collect(),
        eval_call: Regex::new(r"\beval\(").expect("eval pattern is valid"),
        formatted_sql: Regex::new(
            r#"^(?P<head>.*\.execute\(\s*)(?P<query>"[^"]*"|'[^']*')\s*%\s*(?P<args>.+?)\s*\)(?P<tail>\s*)$"#,
        )
        .expect("sql pattern is valid"),
        credential: Regex::new(
            r#"(?i)^(?P<name>[a-z_0-9]*(?:password|passwd|api_key|apikey|secret)[a-z_0-9]*)\s*=\s*["'][^"']+["']\s*$"#,
        )
        .expect("credential pattern is valid"),
    })
}

/// Agent enforcing a small set of security rules.
#[derive(Debug, Default)]
pub struct SecurityEnforcer;

impl SecurityEnforcer {
    pub fn new() -> Self {
        Self
    }

    /// Categories of every vulnerability pattern matched in `code`.
    pub fn scan_vulnerabilities(&self, code: &str) -> Vec<&'static str> {
        rules()
            .scan
            .iter()
            .filter(|(_, regex)| regex.is_match(code))
            .map(|(category, _)| *category)
            .collect()
    }

    fn fix_sql(line: &str) -> Option<String> {
        if line.contains('?') {
            return None;
        }
        let caps = rules().formatted_sql.captures(line)?;
        let query = caps["query"].replace("%s", "?").replace("%d", "?");
        let args = &caps["args"];
        let params = if args.starts_with('(') {
            args.to_string()
        } else {
            format!("({args},)")
        };
        Some(format!("{}{query}, {params}){}", &caps["head"], &caps["tail"]))
    }

    fn fix_credential(line: &str) -> Option<String> {
        if line.contains("os.environ") {
            return None;
        }
        let indent = indent_of(line);
        let caps = rules().credential.captures(&line[indent.len()..])?;
        let name = &caps["name"];
        Some(format!(
            "{indent}{name} = os.environ.get(\"{}\")",
            name.to_uppercase()
        ))
    }

    fn fix_eval(line: &str) -> Option<String> {
        if !line.contains("input(") || !rules().eval_call.is_match(line) {
            return None;
        }
        Some(rules().eval_call.replace_all(line, "ast.literal_eval(").into_owned())
    }
}

impl RefactorAgent for SecurityEnforcer {
    fn id(&self) -> &str {
        SECURITY_ENFORCER_ID
    }

    fn analyze(&self, code: &str) -> anyhow::Result<AgentAnalysis> {
        let mut analysis = AgentAnalysis::new(SECURITY_ENFORCER_ID);
        for category in self.scan_vulnerabilities(code) {
            analysis = analysis.with_pattern(category);
        }
        if analysis.patterns.iter().any(|p| *p == "hardcoded_secrets") {
            analysis = analysis.with_suggestion("Load credentials from the environment");
        }
        if analysis.patterns.iter().any(|p| *p == "sql_injection") {
            analysis = analysis.with_suggestion("Use parameterized queries");
        }
        Ok(analysis)
    }

    fn suggest_changes(&self, code: &str) -> anyhow::Result<Vec<Change>> {
        let lines: Vec<&str> = code.split('\n').collect();
        let mut changes = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(fixed) = Self::fix_sql(line) {
                changes.push(line_change(
                    SECURITY_ENFORCER_ID,
                    ChangeKind::SecurityFix,
                    &lines,
                    idx,
                    fixed,
                    0.9,
                    "Replace string formatting with a parameterized query",
                )?);
            }
            if let Some(fixed) = Self::fix_credential(line) {
                changes.push(line_change(
                    SECURITY_ENFORCER_ID,
                    ChangeKind::SecurityFix,
                    &lines,
                    idx,
                    fixed,
                    0.8,
                    "Move hardcoded credential to an environment variable",
                )?);
            }
            if let Some(fixed) = Self::fix_eval(line) {
                changes.push(line_change(
                    SECURITY_ENFORCER_ID,
                    ChangeKind::SecurityFix,
                    &lines,
                    idx,
                    fixed,
                    0.95,
                    "Replace eval() of user input with ast.literal_eval()",
                )?);
            }
        }
        debug!(agent_id = SECURITY_ENFORCER_ID, proposals = changes.len(), "Security scan complete");
        Ok(changes)
    }

    fn vote(&self, changes: &[Change]) -> anyhow::Result<HashMap<ChangeId, f64>> {
        Ok(ballot(changes, |change| match change.kind() {
            ChangeKind::SecurityFix => change.confidence() * 1.5,
            ChangeKind::StructuralSimplification => change.confidence() * 0.9,
            _ => change.confidence() * 0.7,
        }))
    }

    fn validate_result(&self, original: &str, modified: &str) -> bool {
        self.scan_vulnerabilities(modified).len() <= self.scan_vulnerabilities(original).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_parameterized() {
        let code = "    cursor.execute(\"SELECT * FROM users WHERE id = %s\" % user_id)";
        let changes = SecurityEnforcer::new().suggest_changes(code).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0].modified_code(),
            "    cursor.execute(\"SELECT * FROM users WHERE id = ?\", (user_id,))"
        );
    }

    #[test]
    fn test_sql_tuple_args_kept() {
        let line = "cursor.execute('UPDATE t SET a = %s WHERE id = %d' % (a, id))";
        assert_eq!(
            SecurityEnforcer::fix_sql(line).unwrap(),
            "cursor.execute('UPDATE t SET a = ? WHERE id = ?', (a, id))"
        );
    }

    #[test]
    fn test_credentials_moved_to_env() {
        let code = "def connect():\n    db_password = \"hunter2\"\n    api_key = 'abc123'";
        let changes = SecurityEnforcer::new().suggest_changes(code).unwrap();

        let fixed: Vec<&str> = changes.iter().map(|c| c.modified_code()).collect();
        assert_eq!(
            fixed,
            vec![
                "    db_password = os.environ.get(\"DB_PASSWORD\")",
                "    api_key = os.environ.get(\"API_KEY\")",
            ]
        );
        assert!(SecurityEnforcer::fix_credential("    password = os.environ.get(\"P\")").is_none());
    }

    #[test]
    fn test_eval_of_input_replaced() {
        let changes = SecurityEnforcer::new()
            .suggest_changes("value = eval(input(\"> \"))")
            .unwrap();
        assert_eq!(changes[0].modified_code(), "value = ast.literal_eval(input(\"> \"))");
        assert!((changes[0].confidence() - 0.95).abs() < f64::EPSILON);

        // Plain eval without user input is left alone.
        assert!(SecurityEnforcer::new()
            .suggest_changes("value = eval(expr)")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_analyze_categories() {
        let analysis = SecurityEnforcer::new()
            .analyze("password = 'x'\nos.system('rm ' + path)")
            .unwrap();
        assert_eq!(analysis.issues_found, 2);
        assert!(analysis.patterns.contains(&"hardcoded_secrets".to_string()));
        assert!(analysis.patterns.contains(&"command_injection".to_string()));
    }

    #[test]
    fn test_validate_rejects_new_vulnerabilities() {
        let agent = SecurityEnforcer::new();
        assert!(agent.validate_result("password = 'x'", "password = os.environ.get(\"PASSWORD\")"));
        assert!(!agent.validate_result("x = 1", "x = eval(input())"));
    }
}
