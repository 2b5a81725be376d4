//! 任务解析：从自然语言描述识别意图、复杂度与实体
//!
//! 纯规则匹配（正则 + 关键词），不调用外部提供方。结果只作为 Task 的类型提示与 Supervisor 的元数据，
//! 不改变阶段顺序。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::core::task::Task;

/// 意图 -> 模式列表；得分 = 命中模式数 / 模式总数
const INTENT_PATTERNS: &[(&str, &[&str])] = &[
    (
        "code_generation",
        &[
            r"(write|create|generate|build).*?(code|function|class|script|program|app|tool|calculator)",
            r"implement.*",
            r"develop.*",
            r"program.*",
        ],
    ),
    (
        "testing",
        &[r"test.*", r"run.*test", r"verify.*", r"check.*", r"validate.*"],
    ),
    (
        "documentation",
        &[
            r"(document|docs|documentation).*",
            r"explain.*",
            r"describe.*",
            r"create.*documentation",
        ],
    ),
    (
        "analysis",
        &[
            r"(analyze|examine|investigate|review).*",
            r"find.*(bugs|issues|problems)",
            r"(scan|search|look).*",
        ],
    ),
    (
        "security",
        &[
            r"(secure|protect|guard).*",
            r".*(security|vulnerabilities|audit).*",
            r"check.*(security|vulnerabilities)",
        ],
    ),
    (
        "deployment",
        &[
            r"(deploy|release|publish).*",
            r"(setup|configure|install).*",
            r"(start|launch|run).*(server|service|application)",
        ],
    ),
    (
        "monitoring",
        &[
            r"(monitor|watch|track).*",
            r"(observe|log|record).*",
            r"check.*(status|health|performance)",
        ],
    ),
];

const HIGH_COMPLEXITY: &[&str] = &["complex", "advanced", "enterprise", "production", "scalable", "distributed"];
const MEDIUM_COMPLEXITY: &[&str] = &["moderate", "standard", "typical", "regular", "normal"];
const LOW_COMPLEXITY: &[&str] = &["simple", "basic", "quick", "easy", "minimal", "small"];

const URGENT: &[&str] = &["urgent", "critical", "emergency", "asap", "immediately"];
const IMPORTANT: &[&str] = &["important", "high priority", "soon", "quickly"];
const DEFERRABLE: &[&str] = &["later", "when possible", "low priority", "optional"];

const LANGUAGES: &[&str] = &["python", "javascript", "java", "go", "rust", "typescript"];
const TECHNOLOGIES: &[&str] = &["react", "vue", "angular", "django", "flask", "express", "spring", "docker", "tkinter", "fastapi"];
const ACTIONS: &[&str] = &["create", "build", "test", "deploy", "fix", "update", "delete", "analyze"];

static COMPILED: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();

fn compiled_patterns() -> &'static [(&'static str, Vec<Regex>)] {
    COMPILED.get_or_init(|| {
        INTENT_PATTERNS
            .iter()
            .map(|(intent, patterns)| {
                let regexes = patterns
                    .iter()
                    .filter_map(|p| Regex::new(p).ok())
                    .collect();
                (*intent, regexes)
            })
            .collect()
    })
}

/// 解析结果
#[derive(Debug, Clone, Serialize)]
pub struct TaskIntent {
    pub intent_type: String,
    pub confidence: f32,
    pub complexity: String,
    /// 1..=9
    pub priority: u8,
    pub languages: Vec<String>,
    pub technologies: Vec<String>,
    pub actions: Vec<String>,
}

/// 由描述构建 Task（类型提示取识别出的意图）与意图元数据
pub fn parse_task(description: &str) -> (Task, TaskIntent) {
    let intent = analyze(description);
    let task = Task::new(description).with_type_hint(intent.intent_type.clone());
    (task, intent)
}

pub fn analyze(description: &str) -> TaskIntent {
    let text = description.to_lowercase();

    let mut best: Option<(&str, f32)> = None;
    for (intent, regexes) in compiled_patterns() {
        if regexes.is_empty() {
            continue;
        }
        let hits = regexes.iter().filter(|re| re.is_match(&text)).count();
        if hits == 0 {
            continue;
        }
        let score = hits as f32 / regexes.len() as f32;
        // 同分保留先出现的意图
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((*intent, score));
        }
    }
    let (intent_type, confidence) = best.unwrap_or(("general", 0.5));

    TaskIntent {
        intent_type: intent_type.to_string(),
        confidence,
        complexity: complexity(&text).to_string(),
        priority: priority(&text, intent_type),
        languages: words_present(&text, LANGUAGES),
        technologies: words_present(&text, TECHNOLOGIES),
        actions: words_present(&text, ACTIONS),
    }
}

fn complexity(text: &str) -> &'static str {
    let count = |words: &[&str]| words.iter().filter(|w| text.contains(*w)).count();
    let (high, medium, low) = (count(HIGH_COMPLEXITY), count(MEDIUM_COMPLEXITY), count(LOW_COMPLEXITY));
    if high > 0 && high >= medium && high >= low {
        "high"
    } else if low > 0 && low >= medium {
        "low"
    } else if medium > 0 {
        "medium"
    } else if text.len() > 500 {
        "high"
    } else if text.len() > 100 {
        "medium"
    } else {
        "low"
    }
}

fn priority(text: &str, intent: &str) -> u8 {
    if any_of(text, URGENT) {
        9
    } else if any_of(text, IMPORTANT) {
        7
    } else if any_of(text, DEFERRABLE) {
        3
    } else if matches!(intent, "security" | "testing") {
        6
    } else {
        5
    }
}

fn any_of(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// 按整词匹配，避免 "go" 命中 "good"
fn words_present(text: &str, candidates: &[&str]) -> Vec<String> {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    candidates
        .iter()
        .filter(|c| tokens.contains(*c))
        .map(|c| c.to_string())
        .collect()
}
