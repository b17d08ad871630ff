//! 工具执行器
//!
//! 持有封闭工具集与全局超时，dispatch(ToolCall) 在超时内调用对应工具，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{CodeRun, ExecutionContext, ToolKind, ToolSet};

/// 一次工具调用：按工具类别携带各自的参数
#[derive(Debug, Clone)]
pub enum ToolCall {
    Query {
        sql: String,
    },
    Analyze {
        code: String,
        context: ExecutionContext,
    },
    Chart {
        plot_code: String,
        filename: String,
        context: ExecutionContext,
    },
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::Query { .. } => ToolKind::Query,
            ToolCall::Analyze { .. } => ToolKind::CodeAnalysis,
            ToolCall::Chart { .. } => ToolKind::Visualization,
        }
    }

    fn args_preview(&self) -> String {
        let s = match self {
            ToolCall::Query { sql } => sql.clone(),
            ToolCall::Analyze { code, .. } => code.clone(),
            ToolCall::Chart {
                plot_code, filename, ..
            } => format!("{filename}: {plot_code}"),
        };
        if s.chars().count() > 200 {
            format!("{}...", s.chars().take(200).collect::<String>())
        } else {
            s
        }
    }
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    tools: ToolSet,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(tools: ToolSet, timeout_secs: u64) -> Self {
        Self {
            tools,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 查询工具的库表结构（执行提示词中的 schema 占位符）
    pub async fn query_schema(&self) -> Result<String, AgentError> {
        match timeout(self.timeout, self.tools.query.schema()).await {
            Ok(Ok(schema)) => Ok(schema),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(ToolKind::Query.to_string())),
        }
    }

    /// 执行一次工具调用；超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed；输出 JSON 审计日志
    ///
    /// 返回 CodeRun 以保留「提前结束」的区分，查询与绘图总是 Completed。
    pub async fn dispatch(&self, call: ToolCall) -> Result<CodeRun, AgentError> {
        let kind = call.kind();
        let start = Instant::now();
        let args_preview = call.args_preview();

        let result = timeout(self.timeout, self.run(call)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let halted = matches!(&result, Ok(Ok(CodeRun::Halted(_))));
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": kind.as_str(),
            "ok": ok,
            "outcome": outcome,
            "halted": halted,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(run)) => {
                if halted {
                    tracing::info!(tool = %kind, "analysis code halted early");
                }
                Ok(run)
            }
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(kind.to_string())),
        }
    }

    async fn run(&self, call: ToolCall) -> Result<CodeRun, String> {
        match call {
            ToolCall::Query { sql } => self.tools.query.run(&sql).await.map(CodeRun::Completed),
            ToolCall::Analyze { code, context } => self.tools.code.run(&code, &context).await,
            ToolCall::Chart {
                plot_code,
                filename,
                context,
            } => self
                .tools
                .chart
                .run(&plot_code, &filename, &context)
                .await
                .map(CodeRun::Completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::tools::{ChartTool, CodeTool, QueryTool};

    struct SlowQuery;

    #[async_trait]
    impl QueryTool for SlowQuery {
        async fn run(&self, _query: &str) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("[]".into())
        }
        async fn schema(&self) -> Result<String, String> {
            Err("db offline".into())
        }
    }

    struct HaltingCode;

    #[async_trait]
    impl CodeTool for HaltingCode {
        async fn run(&self, _code: &str, ctx: &ExecutionContext) -> Result<CodeRun, String> {
            Ok(CodeRun::Halted(format!("keys={}", ctx.context.len())))
        }
    }

    struct NoChart;

    #[async_trait]
    impl ChartTool for NoChart {
        async fn run(&self, _: &str, _: &str, _: &ExecutionContext) -> Result<String, String> {
            Err("renderer missing".into())
        }
    }

    fn executor() -> ToolExecutor {
        ToolExecutor::new(
            ToolSet {
                query: Arc::new(SlowQuery),
                code: Arc::new(HaltingCode),
                chart: Arc::new(NoChart),
            },
            1,
        )
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let err = executor()
            .dispatch(ToolCall::Query { sql: "SELECT 1".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(ref t) if t == "sql_query"));
    }

    #[tokio::test]
    async fn test_halted_run_is_a_normal_result() {
        let out = executor()
            .dispatch(ToolCall::Analyze {
                code: "raise SystemExit".into(),
                context: ExecutionContext::default(),
            })
            .await
            .unwrap();
        assert_eq!(out, CodeRun::Halted("keys=0".into()));
    }

    #[tokio::test]
    async fn test_tool_errors_map_to_execution_failed() {
        let exec = executor();
        let err = exec
            .dispatch(ToolCall::Chart {
                plot_code: "plt.plot([1])".into(),
                filename: "a.png".into(),
                context: ExecutionContext::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(ref m) if m == "renderer missing"));
        assert!(matches!(
            exec.query_schema().await.unwrap_err(),
            AgentError::ToolExecutionFailed(_)
        ));
    }
}
