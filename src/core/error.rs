//! Agent 错误类型
//!
//! 步骤级失败（工具报错、结果带 error、未知工具）在 StepExecutor 内被吸收进错误日志，
//! 只有节点级失败（理解 / 规划 / 报告时模型不可用、检查点读写失败）才会以 AgentError 冒到服务边界。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 计划步骤引用了封闭工具集之外的工具
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// 步骤失败的分类（对应错误分类中的 ToolExecutionError / ResultError / UnknownTool）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 工具抛错、超时或模型调用失败
    ToolExecution,
    /// 工具正常返回，但结果携带 "error" 字段
    ResultError,
    /// 工具选择器不在封闭集合内
    UnknownTool,
}

impl From<&AgentError> for FailureKind {
    fn from(err: &AgentError) -> Self {
        match err {
            AgentError::UnknownTool(_) => FailureKind::UnknownTool,
            _ => FailureKind::ToolExecution,
        }
    }
}
