//! Engineer 阶段：需求拆解、关注点识别、架构建议与文件计划
//!
//! 产出 engineering/spec.json、design.md、plan.json；payload 中的 language 与 entry_file 供下游使用。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::agents::context::{StageContext, StageOutput};
use crate::agents::registry::Agent;
use crate::core::error::StageError;
use crate::core::workspace::Subdir;

const NON_FUNCTIONAL: &[&str] = &["performance", "security", "usability", "reliability"];
const HIGH_PRIORITY: &[&str] = &["critical", "must", "essential"];
const LOW_PRIORITY: &[&str] = &["nice to have", "optional", "could"];

const CONCERN_PATTERNS: &[(&str, &str)] = &[
    ("scalability", r"\b(scale|load|performance|users)\b"),
    ("security", r"\b(security|auth|secure)\b"),
    ("reliability", r"\b(reliable|backup|uptime)\b"),
    ("maintainability", r"\b(maintain|update|modify)\b"),
    ("integration", r"\b(integrate|api|connect)\b"),
];

static CONCERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

fn concern_patterns() -> &'static [(&'static str, Regex)] {
    CONCERNS.get_or_init(|| {
        CONCERN_PATTERNS
            .iter()
            .filter_map(|(name, p)| Regex::new(p).ok().map(|re| (*name, re)))
            .collect()
    })
}

/// 一条需求
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    /// functional / non_functional
    pub kind: String,
    /// high / medium / low
    pub priority: String,
}

/// 按句号拆句，每句一条需求
pub fn extract_requirements(description: &str) -> Vec<Requirement> {
    description
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, sentence)| {
            let lowered = sentence.to_lowercase();
            let has = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
            let kind = if has(NON_FUNCTIONAL) { "non_functional" } else { "functional" };
            let priority = if has(HIGH_PRIORITY) {
                "high"
            } else if has(LOW_PRIORITY) {
                "low"
            } else {
                "medium"
            };
            Requirement {
                id: format!("req_{}", i + 1),
                description: sentence.to_string(),
                kind: kind.to_string(),
                priority: priority.to_string(),
            }
        })
        .collect()
}

/// 关注点 -> 命中的关键词（去重、排序）
pub fn analyze_concerns(description: &str) -> serde_json::Map<String, serde_json::Value> {
    let text = description.to_lowercase();
    concern_patterns()
        .iter()
        .map(|(name, re)| {
            let mut hits: Vec<String> = re.find_iter(&text).map(|m| m.as_str().to_string()).collect();
            hits.sort();
            hits.dedup();
            (name.to_string(), json!(hits))
        })
        .collect()
}

/// web_application / api_service / data_processing / general
pub fn project_type(description: &str) -> &'static str {
    let text = description.to_lowercase();
    let has = |w: &str| text.split(|c: char| !c.is_ascii_alphanumeric()).any(|t| t == w);
    if has("web") || has("website") || has("frontend") {
        "web_application"
    } else if has("api") || has("endpoint") || has("rest") {
        "api_service"
    } else if has("data") || has("csv") || has("etl") || has("pipeline") {
        "data_processing"
    } else {
        "general"
    }
}

/// 目标语言，默认 python
pub fn detect_language(description: &str) -> &'static str {
    let text = description.to_lowercase();
    let has = |w: &str| text.split(|c: char| !c.is_ascii_alphanumeric()).any(|t| t == w);
    if has("typescript") || has("ts") {
        "typescript"
    } else if has("javascript") || has("js") || has("node") || has("nodejs") {
        "javascript"
    } else if has("golang") || has("go") {
        "go"
    } else {
        "python"
    }
}

pub fn extension_for(language: &str) -> &'static str {
    match language {
        "python" => "py",
        "js" | "javascript" => "js",
        "ts" | "typescript" => "ts",
        "go" => "go",
        _ => "txt",
    }
}

fn plan_steps(project_type: &str) -> &'static [&'static str] {
    match project_type {
        "api_service" => &[
            "requirements_analysis",
            "api_design",
            "authentication_planning",
            "testing_strategy",
            "deployment_basics",
        ],
        "data_processing" => &[
            "data_analysis",
            "processing_design",
            "storage_planning",
            "scheduling_approach",
            "monitoring_basics",
        ],
        _ => &[
            "requirements_analysis",
            "basic_design",
            "technology_selection",
            "development_planning",
            "testing_approach",
        ],
    }
}

fn recommend_architecture(project_type: &str, scalability_hits: bool) -> (&'static str, &'static str) {
    if scalability_hits && matches!(project_type, "web_application" | "api_service") {
        ("microservices", "Distributed architecture with independent services")
    } else if project_type == "data_processing" {
        ("layered", "Hierarchical organization of components")
    } else {
        ("monolithic", "Single deployable unit architecture")
    }
}

/// Engineer 阶段
#[derive(Debug, Default)]
pub struct EngineerAgent;

#[async_trait]
impl Agent for EngineerAgent {
    fn name(&self) -> &str {
        "engineer"
    }

    fn description(&self) -> &str {
        "Requirement extraction, architecture recommendation and file plan"
    }

    fn subdir(&self) -> Subdir {
        Subdir::Engineering
    }

    async fn run(&self, ctx: StageContext) -> Result<StageOutput, StageError> {
        let description = ctx.task.description.trim();
        if description.is_empty() {
            return Err(StageError::InvalidInput("empty task description".into()));
        }

        let requirements = extract_requirements(description);
        let concerns = analyze_concerns(description);
        let project_type = project_type(description);
        let scalability = concerns
            .get("scalability")
            .and_then(|v| v.as_array())
            .map_or(false, |a| !a.is_empty());
        let (pattern, pattern_summary) = recommend_architecture(project_type, scalability);
        let language = detect_language(description);
        let entry_file = format!("{}.{}", ctx.task.slug().stem(), extension_for(language));

        let spec = json!({
            "description": description,
            "type_hint": ctx.task.type_hint,
            "project_type": project_type,
            "requirements": requirements,
            "derived_concerns": concerns,
        });
        let plan = json!({
            "project_type": project_type,
            "steps": plan_steps(project_type),
            "files": [{"path": entry_file, "language": language, "role": "entry"}],
        });

        let mut design = format!(
            "# Design: {}\n\n## Architecture\n\n- Pattern: {} ({})\n- Project type: {}\n- Language: {}\n- Entry file: {}\n\n## Requirements\n\n",
            description, pattern, pattern_summary, project_type, language, entry_file
        );
        for r in &requirements {
            design.push_str(&format!("- [{}] ({}, {}) {}\n", r.id, r.kind, r.priority, r.description));
        }

        let spec_path = ctx.dir.write_json("spec.json", &spec).await?;
        let design_path = ctx.dir.write_file("design.md", design).await?;
        let plan_path = ctx.dir.write_json("plan.json", &plan).await?;

        Ok(StageOutput::new()
            .with("project_type", project_type)
            .with("language", language)
            .with("entry_file", entry_file)
            .with("architecture", pattern)
            .with("requirements", json!(requirements))
            .file(spec_path)
            .file(design_path)
            .file(plan_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agents::context::Context;
    use crate::core::task::Task;
    use crate::core::workspace::WorkspaceAllocator;
    use tempfile::TempDir;

    #[test]
    fn requirements_are_split_and_classified() {
        let reqs = extract_requirements(
            "Build a todo app. It must persist items. Performance should be good. Dark mode is optional.",
        );
        assert_eq!(reqs.len(), 4);
        assert_eq!(reqs[1].priority, "high");
        assert_eq!(reqs[2].kind, "non_functional");
        assert_eq!(reqs[3].priority, "low");
        assert_eq!(reqs[3].id, "req_4");
    }

    #[test]
    fn language_and_project_detection() {
        assert_eq!(detect_language("create a calculator"), "python");
        assert_eq!(detect_language("a node script"), "javascript");
        assert_eq!(detect_language("a good tool"), "python");
        assert_eq!(extension_for("go"), "go");
        assert_eq!(project_type("REST api for users"), "api_service");
    }

    #[test]
    fn scalable_api_gets_microservices() {
        let concerns = analyze_concerns("an api that must scale to many users");
        assert_eq!(concerns["scalability"], json!(["scale", "users"]));
        assert_eq!(recommend_architecture("api_service", true).0, "microservices");
        assert_eq!(recommend_architecture("general", true).0, "monolithic");
    }

    #[tokio::test]
    async fn writes_engineering_artifacts() {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceAllocator::new(dir.path())
            .allocate("create a calculator")
            .await
            .unwrap();
        let ctx = StageContext {
            task: Arc::new(Task::new("create a calculator")),
            inputs: Context::new().inputs_for(&[]),
            dir: ws.stage_dir(Subdir::Engineering),
        };

        let out = EngineerAgent.run(ctx).await.unwrap();
        assert_eq!(out.payload["entry_file"], "create_a_calculator.py");
        assert_eq!(out.files.len(), 3);
        for name in ["spec.json", "design.md", "plan.json"] {
            assert!(ws.dir(Subdir::Engineering).join(name).exists());
        }
    }
}
