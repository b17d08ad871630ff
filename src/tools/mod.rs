//! 工具层：封闭工具集与调度
//!
//! 三类工具各有一个 trait（查询 / 代码分析 / 绘图），由 ToolSet 持有、ToolExecutor 按 ToolCall 调度。
//! 工具返回 Ok(文本) 表示「工具正常返回」，文本本身可能是 {"error": ...} 对象，由 StepExecutor 识别；
//! Err 只用于工具自身无法运行（进程启动失败、连接失败等）。

pub mod analysis;
pub mod chart;
pub mod executor;
pub mod kind;
pub mod sandbox;
pub mod sql;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::state::Context;

pub use analysis::PythonAnalysisTool;
pub use chart::PythonChartTool;
pub use executor::{ToolCall, ToolExecutor};
pub use kind::{ToolKind, ToolSelector};
pub use sandbox::{PythonSandbox, SandboxOutcome};
pub use sql::SqliteQueryTool;

/// 单次工具调用的执行上下文：规范化后的步骤结果，按调用显式传入，不经过任何全局作用域
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub context: Context,
}

impl ExecutionContext {
    pub fn new(context: Context) -> Self {
        Self { context }
    }
}

/// 代码执行结果；Halted 表示代码主动提前结束（如 sys.exit），不是错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeRun {
    Completed(String),
    Halted(String),
}

impl CodeRun {
    pub fn into_output(self) -> String {
        match self {
            CodeRun::Completed(out) | CodeRun::Halted(out) => out,
        }
    }
}

/// 数据库查询工具
#[async_trait]
pub trait QueryTool: Send + Sync {
    /// 执行查询：行对象数组，或 {"error": ...} / {"warning": ...} / {"status": ...} 对象
    async fn run(&self, query: &str) -> Result<String, String>;

    /// 提示词使用的库表结构描述
    async fn schema(&self) -> Result<String, String>;
}

/// 代码分析工具：返回捕获的标准输出，或 {"error","type","traceback"} 对象
#[async_trait]
pub trait CodeTool: Send + Sync {
    async fn run(&self, code: &str, ctx: &ExecutionContext) -> Result<CodeRun, String>;
}

/// 绘图工具：返回 {"status":"success","path"} 或错误对象
#[async_trait]
pub trait ChartTool: Send + Sync {
    async fn run(
        &self,
        plot_code: &str,
        filename: &str,
        ctx: &ExecutionContext,
    ) -> Result<String, String>;
}

/// 封闭工具集：每个 ToolKind 恰好对应一个实现
#[derive(Clone)]
pub struct ToolSet {
    pub query: Arc<dyn QueryTool>,
    pub code: Arc<dyn CodeTool>,
    pub chart: Arc<dyn ChartTool>,
}
