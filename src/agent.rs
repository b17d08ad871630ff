//! 从配置装配分析服务
//!
//! create_llm_from_config 选择 LLM 后端，create_checkpoint_store 选择检查点后端，
//! create_tool_set 构建三类工具，create_service 把它们组装成 AnalysisService。
//! 检查点后端无法按配置创建时退回内存实现并给出警告；没有 API Key 时模型调用直接报错。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::llm::{create_deepseek_client, LlmClient, OpenAiClient};
use crate::memory::{
    CheckpointStore, ContextManager, JsonFileCheckpointStore, MemoryCheckpointStore, Message,
    SqliteCheckpointStore,
};
use crate::service::AnalysisService;
use crate::tools::{
    PythonAnalysisTool, PythonChartTool, PythonSandbox, SqliteQueryTool, ToolExecutor, ToolSet,
};
use crate::workflow::{FeedbackGate, PromptTemplates, Reporter, StepExecutor, WorkflowController};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = crate::llm::has_deepseek_key()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";
    let timeout = cfg.llm.timeouts.request;
    let delay = cfg.llm.timeouts.request_delay_ms;

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(
            create_deepseek_client(Some(&model), cfg.llm.base_url.as_deref())
                .with_request_timeout(timeout)
                .with_request_delay(delay),
        )
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(
            OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(timeout)
            .with_request_delay(delay),
        )
    } else {
        tracing::error!("No LLM API key set: export DEEPSEEK_API_KEY or OPENAI_API_KEY");
        Arc::new(MissingKeyClient)
    }
}

const MISSING_KEY: &str = "no LLM API key configured (set DEEPSEEK_API_KEY or OPENAI_API_KEY)";

/// 未配置 API Key 时的占位客户端：每次调用都返回明确的错误
struct MissingKeyClient;

#[async_trait]
impl LlmClient for MissingKeyClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        Err(MISSING_KEY.to_string())
    }
}

/// 按 [checkpoint] 段创建检查点存储；sqlite 打不开时退回内存实现
pub fn create_checkpoint_store(cfg: &AppConfig) -> Arc<dyn CheckpointStore> {
    let path = &cfg.checkpoint.path;
    match cfg.checkpoint.backend.to_lowercase().as_str() {
        "sqlite" => match SqliteCheckpointStore::open(path) {
            Ok(store) => {
                tracing::info!("Using SQLite checkpoint store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite checkpoints, falling back to memory: {}", e);
            }
        },
        "json" => {
            tracing::info!("Using JSON file checkpoint store: {:?}", path);
            return Arc::new(JsonFileCheckpointStore::new(path));
        }
        "memory" => {}
        other => tracing::warn!("Unknown checkpoint backend '{}', using memory", other),
    }
    tracing::info!("Using in-memory checkpoint store");
    Arc::new(MemoryCheckpointStore::new())
}

/// SQLite 查询 + Python 分析 + Python 绘图
pub fn create_tool_set(cfg: &AppConfig) -> ToolSet {
    let sandbox = PythonSandbox::new(cfg.tools.python.clone());
    ToolSet {
        query: Arc::new(SqliteQueryTool::new(
            &cfg.tools.database_path,
            cfg.tools.max_rows,
        )),
        code: Arc::new(PythonAnalysisTool::new(sandbox.clone())),
        chart: Arc::new(PythonChartTool::new(sandbox, &cfg.tools.images_dir)),
    }
}

/// 用给定的 LLM、工具与检查点存储组装服务；其余参数取自配置
pub fn build_service(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    tools: ToolSet,
    store: Arc<dyn CheckpointStore>,
) -> AnalysisService {
    let prompts = Arc::new(PromptTemplates::load(
        &cfg.prompts.dir,
        &cfg.prompts.report_template,
    ));
    let executor = StepExecutor::new(
        Arc::clone(&llm),
        Arc::new(ToolExecutor::new(tools, cfg.tools.tool_timeout_secs)),
        Arc::clone(&prompts),
        ContextManager::from_config(&cfg.workflow, &cfg.context),
    );
    let reports_dir: Option<PathBuf> = if cfg.app.reports_dir.as_os_str().is_empty() {
        None
    } else {
        Some(cfg.app.reports_dir.clone())
    };
    let controller = WorkflowController::new(
        llm,
        prompts,
        executor,
        FeedbackGate::new(cfg.workflow.approval_keywords.clone()),
        Reporter::new(reports_dir, cfg.workflow.report_output_chars),
        store,
        cfg.workflow.max_errors,
    );
    AnalysisService::new(controller)
}

/// 按配置创建完整的分析服务
pub fn create_service(cfg: &AppConfig) -> AnalysisService {
    build_service(
        cfg,
        create_llm_from_config(cfg),
        create_tool_set(cfg),
        create_checkpoint_store(cfg),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_fails_with_clear_message() {
        let err = MissingKeyClient
            .complete(&[Message::user("x")])
            .await
            .unwrap_err();
        assert!(err.contains("DEEPSEEK_API_KEY"));

        let keyless = !crate::llm::has_deepseek_key() && std::env::var("OPENAI_API_KEY").is_err();
        if keyless {
            let llm = create_llm_from_config(&AppConfig::default());
            let err = crate::llm::invoke(llm.as_ref(), "分析").await.unwrap_err();
            assert!(err.to_string().contains("API key"));
        }
    }

    #[tokio::test]
    async fn test_checkpoint_backend_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        let state = crate::core::SessionState::new("s1", "x");

        cfg.checkpoint.backend = "json".into();
        cfg.checkpoint.path = dir.path().join("cp");
        let store = create_checkpoint_store(&cfg);
        store.save(&state).await.unwrap();
        assert!(dir.path().join("cp").join("s1.json").exists());

        cfg.checkpoint.backend = "sqlite".into();
        cfg.checkpoint.path = dir.path().join("cp.db");
        let store = create_checkpoint_store(&cfg);
        store.save(&state).await.unwrap();
        assert!(dir.path().join("cp.db").exists());

        cfg.checkpoint.backend = "carrier-pigeon".into();
        let store = create_checkpoint_store(&cfg);
        assert!(store.load("s1").await.unwrap().is_none());
    }
}
