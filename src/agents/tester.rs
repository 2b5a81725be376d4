//! Tester 阶段：对生成代码做静态检查，结果写入 tests/report.json
//!
//! 检查出问题不算阶段失败，问题列表作为 payload 交给 Patcher。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::agents::context::{StageContext, StageOutput};
use crate::agents::registry::Agent;
use crate::core::error::StageError;
use crate::core::workspace::Subdir;

/// 检查报告
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationReport {
    pub passed: bool,
    pub issues: Vec<String>,
    pub lines_checked: usize,
}

/// 逐行检查：冒号后缺缩进、TODO 标记、括号不配对
pub fn validate_code(code: &str, language: &str) -> ValidationReport {
    let mut issues = Vec::new();
    let lines: Vec<&str> = code.lines().collect();

    if code.trim().is_empty() {
        issues.push("No code provided for validation".to_string());
    }

    if language == "python" {
        for (i, pair) in lines.windows(2).enumerate() {
            let (prev, line) = (pair[0], pair[1]);
            let prev_opens_block = prev.trim_end().ends_with(':') && !prev.trim_start().starts_with('#');
            let indent = |s: &str| s.len() - s.trim_start().len();
            if prev_opens_block && !line.trim().is_empty() && indent(line) <= indent(prev) {
                issues.push(format!("Line {}: Missing indentation after colon", i + 2));
            }
        }
    }

    if code.contains("TODO") {
        issues.push("Code contains TODO items".to_string());
    }

    for (open, close) in [('(', ')'), ('[', ']'), ('{', '}')] {
        let opens = code.chars().filter(|c| *c == open).count();
        let closes = code.chars().filter(|c| *c == close).count();
        if opens != closes {
            issues.push(format!("Unbalanced '{}{}': {} open, {} close", open, close, opens, closes));
        }
    }

    ValidationReport {
        passed: issues.is_empty(),
        issues,
        lines_checked: lines.len(),
    }
}

/// Tester 阶段
#[derive(Debug, Default)]
pub struct TesterAgent;

#[async_trait]
impl Agent for TesterAgent {
    fn name(&self) -> &str {
        "tester"
    }

    fn description(&self) -> &str {
        "Static validation of generated code"
    }

    fn dependencies(&self) -> &[&'static str] {
        &["codegen"]
    }

    fn subdir(&self) -> Subdir {
        Subdir::Tests
    }

    async fn run(&self, ctx: StageContext) -> Result<StageOutput, StageError> {
        let code = ctx.inputs.str_field("codegen", "code")?;
        let language = ctx.inputs.str_field("codegen", "language")?;
        let entry_file = ctx.inputs.str_field("codegen", "entry_file")?;

        let report = validate_code(code, language);
        let path = ctx
            .dir
            .write_json(
                "report.json",
                &json!({
                    "target": entry_file,
                    "validation": "static_check",
                    "report": report,
                }),
            )
            .await?;

        Ok(StageOutput::new()
            .with("passed", report.passed)
            .with("issues", json!(report.issues))
            .with("lines_checked", report.lines_checked)
            .file(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_code_passes() {
        let report = validate_code("def add(a, b):\n    return a + b\n", "python");
        assert!(report.passed, "{:?}", report.issues);
        assert_eq!(report.lines_checked, 2);
    }

    #[test]
    fn flags_indentation_and_todo() {
        let report = validate_code("def f():\nreturn 1\n# TODO: more\n", "python");
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.starts_with("Line 2: Missing indentation")));
        assert!(report.issues.iter().any(|i| i.contains("TODO")));
    }

    #[test]
    fn flags_unbalanced_brackets_and_empty_code() {
        assert!(!validate_code("print((1)", "python").passed);
        let empty = validate_code("   ", "python");
        assert_eq!(empty.issues, vec!["No code provided for validation"]);
    }

    #[test]
    fn calculator_template_is_clean() {
        let code = crate::agents::codegen::template_for("create a calculator", "python");
        let report = validate_code(&code, "python");
        assert!(report.passed, "{:?}", report.issues);
    }
}
