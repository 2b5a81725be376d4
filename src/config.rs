//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ORBIT__*` 覆盖（双下划线表示嵌套，如 `ORBIT__DEMO__ENABLED=true`）。
//! 编排核心只消费解析好的值，不自己读文件。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub demo: DemoSection,
    pub llm: LlmSection,
    pub packaging: PackagingSection,
    pub keystore: KeyStoreSection,
    pub retention: RetentionSection,
    pub web: WebSection,
}

/// [app] 段：输出根目录、日志级别、升级提示、历史长度
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// 为 true 时日志级别提升到 debug
    #[serde(default)]
    pub verbose: bool,
    /// 最终产物中是否附带 upgrade_hint 字段
    #[serde(default = "default_true")]
    pub show_upgrade_hint: bool,
    /// Supervisor 保留的任务历史条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            verbose: false,
            show_upgrade_hint: true,
            history_limit: default_history_limit(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

fn default_history_limit() -> usize {
    100
}

/// [demo] 段：共享中继（维护者托管的 Key），受两次调用上限约束
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DemoSection {
    #[serde(default)]
    pub enabled: bool,
    pub relay_url: Option<String>,
    /// 作为 X-Orbit-Demo 头发送的共享密钥
    pub relay_auth: Option<String>,
}

impl DemoSection {
    /// demo 开启且填写了非空中继地址时才算「已配置中继」
    pub fn relay_endpoint(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.relay_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// [llm] 段：本地 Key 直连时的端点、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 本地推理服务地址；本版本不支持，只在启动时告警
    pub local_server_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            local_server_url: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    60
}

/// [packaging] 段：可执行文件打包
#[derive(Debug, Clone, Deserialize)]
pub struct PackagingSection {
    /// 不看描述关键词，总是尝试打包
    #[serde(default)]
    pub force_exe: bool,
    /// 执行 PyInstaller 的解释器
    #[serde(default = "default_python")]
    pub python: String,
}

impl Default for PackagingSection {
    fn default() -> Self {
        Self {
            force_exe: false,
            python: default_python(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

/// [keystore] 段：本地凭据文件
#[derive(Debug, Clone, Deserialize)]
pub struct KeyStoreSection {
    #[serde(default = "default_keystore_path")]
    pub path: PathBuf,
}

impl Default for KeyStoreSection {
    fn default() -> Self {
        Self {
            path: default_keystore_path(),
        }
    }
}

fn default_keystore_path() -> PathBuf {
    PathBuf::from("config/credentials.toml")
}

/// [retention] 段：外部清理命令使用，编排器自身从不删除工作区
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetentionSection {
    /// 超过天数的任务目录会被删除；0 表示不按时间清理
    #[serde(default)]
    pub days: u64,
    /// 输出目录总占用上限（MB）；0 表示不限
    #[serde(default)]
    pub max_disk_mb: u64,
}

/// [web] 段：HTTP 入口监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// 从 config 目录加载配置，环境变量 ORBIT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ORBIT__*（双下划线表示嵌套键）
/// 4. 未配置 llm.api_key 时回退读取 OPENAI_API_KEY
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ORBIT")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    if cfg.llm.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        cfg.llm.api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
    }
    Ok(cfg)
}
