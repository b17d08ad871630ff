//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ANALYST__*` 覆盖（双下划线表示嵌套，如 `ANALYST__LLM__PROVIDER=openai`）。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub workflow: WorkflowSection,
    pub context: ContextSection,
    pub checkpoint: CheckpointSection,
    pub prompts: PromptsSection,
    pub server: ServerSection,
}

/// [app] 段：应用名、报告输出目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// Markdown 报告保存目录；为空字符串时不落盘
    pub reports_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            reports_dir: PathBuf::from("reports/files"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmModelSection,
    pub openai: LlmModelSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次补全请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    /// 每次请求前的等待（毫秒），配额较紧的端点可调大
    #[serde(default)]
    pub request_delay_ms: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            request_delay_ms: 0,
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [tools] 段：工具超时、查询库路径、Python 解释器、图表目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// SQLite 数据库文件
    pub database_path: PathBuf,
    /// 单次查询最多返回的行数
    pub max_rows: usize,
    /// 执行分析 / 绘图代码的解释器
    pub python: String,
    pub images_dir: PathBuf,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 120,
            database_path: PathBuf::from("data/analysis.db"),
            max_rows: 1000,
            python: "python3".to_string(),
            images_dir: PathBuf::from("reports/images"),
        }
    }
}

/// [workflow] 段：错误预算、提示词上下文窗口、报告截断、审批关键词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 错误日志长度超过该值即终止会话
    pub max_errors: usize,
    /// 提示词中只保留最近几个步骤的结果
    pub context_window: usize,
    /// 列表超过该长度时只保留首尾
    pub list_threshold: usize,
    /// 截断时首尾各保留的条数
    pub list_keep: usize,
    /// 长文本在提示词中的字符预算
    pub text_budget_chars: usize,
    /// 报告提示词中单个步骤输出的字符上限
    pub report_output_chars: usize,
    pub approval_keywords: Vec<String>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_errors: 3,
            context_window: 3,
            list_threshold: 20,
            list_keep: 10,
            text_budget_chars: 5000,
            report_output_chars: 3000,
            approval_keywords: default_approval_keywords(),
        }
    }
}

fn default_approval_keywords() -> Vec<String> {
    ["同意", "执行", "开始", "确认", "approve", "proceed", "confirm", "yes", "ok"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// [context] 段：表格字段别名（原字段 -> 规范名）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub field_aliases: BTreeMap<String, String>,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            field_aliases: default_field_aliases(),
        }
    }
}

pub fn default_field_aliases() -> BTreeMap<String, String> {
    [
        ("revenue_billion", "revenue"),
        ("net_profit_billion", "net_profit"),
        ("gross_margin_pct", "gross_margin"),
        ("revenue_growth_pct", "revenue_growth"),
        ("net_profit_growth_pct", "net_profit_growth"),
        ("on_hand_orders_billion", "on_hand_orders"),
        ("update_date", "report_date"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// [checkpoint] 段：检查点后端（sqlite / json / memory）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub backend: String,
    /// sqlite 为数据库文件，json 为目录
    pub path: PathBuf,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("data/checkpoints.db"),
        }
    }
}

/// [prompts] 段：提示词目录与报告模板
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsSection {
    pub dir: PathBuf,
    pub report_template: PathBuf,
}

impl Default for PromptsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("config/prompts"),
            report_template: PathBuf::from("config/templates/industry_research.md"),
        }
    }
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ANALYST__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ANALYST__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("ANALYST")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
