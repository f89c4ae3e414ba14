//! Python syntax check on the patched source via tree-sitter.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tree_sitter::{Node, Parser};

use super::{run_blocking, Analyzer, AnalyzerError};
use crate::domain::{Finding, FindingSource, Location, Severity};

const TOOL: &str = "syntax";
const MAX_REPORTED: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct SyntaxAnalyzer;

impl SyntaxAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Parse `code` and report the first few ERROR/MISSING nodes.
    pub fn check(&self, code: &str) -> Result<Vec<Finding>, AnalyzerError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| AnalyzerError::Unavailable {
                tool: TOOL.to_string(),
                message: format!("failed to load python grammar: {e}"),
            })?;
        let tree = parser
            .parse(code, None)
            .ok_or_else(|| AnalyzerError::Crashed {
                tool: TOOL.to_string(),
                message: "parser returned no tree".to_string(),
            })?;

        let root = tree.root_node();
        if !root.has_error() {
            return Ok(Vec::new());
        }

        let mut errors = Vec::new();
        collect_errors(root, &mut errors);
        if errors.is_empty() {
            // has_error() without a located node; report at the root.
            errors.push((1, 0, false));
        }
        let total = errors.len();

        Ok(errors
            .into_iter()
            .take(MAX_REPORTED)
            .map(|(line, column, missing)| {
                let what = if missing { "missing token" } else { "unexpected syntax" };
                Finding::new(
                    FindingSource::StaticAnalyzer,
                    "syntax-error",
                    Severity::High,
                    format!("{what} at line {line}, column {column}"),
                )
                .with_location(Location::line(line))
                .with_raw(json!({ "column": column, "missing": missing, "error_nodes": total }))
            })
            .collect())
    }
}

fn collect_errors(node: Node, out: &mut Vec<(u32, usize, bool)>) {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        out.push((pos.row as u32 + 1, pos.column, node.is_missing()));
        return;
    }
    if !node.has_error() {
        return;
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            collect_errors(child, out);
        }
    }
}

#[async_trait]
impl Analyzer for SyntaxAnalyzer {
    fn name(&self) -> &str {
        TOOL
    }

    fn source(&self) -> FindingSource {
        FindingSource::StaticAnalyzer
    }

    async fn analyze(&self, code: &str, _timeout: Duration) -> Result<Vec<Finding>, AnalyzerError> {
        let analyzer = self.clone();
        let code = code.to_string();
        run_blocking(TOOL, move || analyzer.check(&code)).await
    }
}
