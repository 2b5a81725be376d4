//! Patcher 阶段：按 Tester 的问题列表自动修补生成代码
//!
//! 修补项：未完成函数（TODO 注释、函数体内裸 pass）、缺失的标准库 import、Python 2 风格 print、
//! 行尾空白与多余空行。结果写入 patches/<entry_file> 与 patches/patch.json。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::agents::context::{StageContext, StageOutput};
use crate::agents::registry::Agent;
use crate::core::error::StageError;
use crate::core::workspace::Subdir;

static TODO_COMMENT: OnceLock<Regex> = OnceLock::new();
static PY2_PRINT: OnceLock<Regex> = OnceLock::new();
static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

/// 修补结果
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub code: String,
    pub fixes_applied: Vec<String>,
}

pub fn auto_patch(code: &str, issues: &[String], language: &str) -> Patch {
    let mut fixes = Vec::new();
    let mut patched = code.to_string();

    if language == "python" {
        if issues.iter().any(|i| i.contains("TODO")) || patched.contains("pass") {
            let next = fix_incomplete_functions(&patched);
            if next != patched {
                fixes.push("Added basic function implementations".to_string());
                patched = next;
            }
        }

        let next = fix_missing_imports(&patched);
        if next != patched {
            fixes.push("Added missing imports".to_string());
            patched = next;
        }

        let next = regex(&PY2_PRINT, r"(?m)^([ \t]*)print[ \t]+([^(\s].*?)[ \t]*$")
            .replace_all(&patched, "${1}print(${2})")
            .into_owned();
        if next != patched {
            fixes.push("Fixed print statements".to_string());
            patched = next;
        }
    }

    let next = fix_style(&patched);
    if next != patched {
        fixes.push("Normalized whitespace".to_string());
        patched = next;
    }

    Patch {
        code: patched,
        fixes_applied: fixes,
    }
}

/// TODO 注释改为 `return None`，函数体内单独一行的 pass 同样替换
fn fix_incomplete_functions(code: &str) -> String {
    let replaced = regex(&TODO_COMMENT, r"#\s*TODO.*").replace_all(code, "return None");

    let mut in_function = false;
    let mut out = Vec::new();
    for line in replaced.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("def ") {
            in_function = true;
        } else if !trimmed.is_empty() && !line.starts_with(' ') && !line.starts_with('\t') {
            in_function = false;
        } else if trimmed == "pass" && in_function {
            out.push(line.replacen("pass", "return None", 1));
            continue;
        }
        out.push(line.to_string());
    }
    let mut joined = out.join("\n");
    if code.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

fn fix_missing_imports(code: &str) -> String {
    let mut imports = Vec::new();
    for module in ["json", "os", "sys"] {
        let used = code.contains(&format!("{module}."));
        let imported = code.contains(&format!("import {module}"));
        if used && !imported {
            imports.push(format!("import {module}"));
        }
    }
    if code.contains("datetime") && !code.contains("import datetime") && !code.contains("from datetime") {
        imports.push("from datetime import datetime".to_string());
    }
    if imports.is_empty() {
        return code.to_string();
    }
    format!("{}\n\n{}", imports.join("\n"), code)
}

/// 去行尾空白，三个及以上连续换行压成两个
fn fix_style(code: &str) -> String {
    let stripped: Vec<&str> = code.lines().map(str::trim_end).collect();
    let mut joined = stripped.join("\n");
    if code.ends_with('\n') {
        joined.push('\n');
    }
    regex(&BLANK_RUNS, r"\n{3,}")
        .replace_all(&joined, "\n\n")
        .into_owned()
}

/// Patcher 阶段
#[derive(Debug, Default)]
pub struct PatcherAgent;

#[async_trait]
impl Agent for PatcherAgent {
    fn name(&self) -> &str {
        "patcher"
    }

    fn description(&self) -> &str {
        "Automatic fixes for issues found by the tester"
    }

    fn dependencies(&self) -> &[&'static str] {
        &["codegen", "tester"]
    }

    fn subdir(&self) -> Subdir {
        Subdir::Patches
    }

    async fn run(&self, ctx: StageContext) -> Result<StageOutput, StageError> {
        let code = ctx.inputs.str_field("codegen", "code")?;
        let language = ctx.inputs.str_field("codegen", "language")?;
        let entry_file = ctx.inputs.str_field("codegen", "entry_file")?;
        let issues: Vec<String> = ctx
            .inputs
            .payload("tester")?
            .get("issues")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|i| i.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let patch = auto_patch(code, &issues, language);
        let changed = patch.code != code;

        let code_path = ctx.dir.write_file(entry_file, &patch.code).await?;
        let summary_path = ctx
            .dir
            .write_json(
                "patch.json",
                &json!({
                    "patch_type": "auto",
                    "target": entry_file,
                    "issues_in": issues,
                    "fixes_applied": patch.fixes_applied,
                    "changed": changed,
                }),
            )
            .await?;

        Ok(StageOutput::new()
            .with("changed", changed)
            .with("fixes_applied", json!(patch.fixes_applied))
            .with("patched_code", patch.code)
            .file(code_path)
            .file(summary_path))
    }
}
