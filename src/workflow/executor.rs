//! 步骤执行器：执行计划中当前索引处的一个步骤
//!
//! 每个周期最多调用一次模型和一次工具：
//! 1. 为该工具准备辅助信息（查询工具附带库表结构）与截断后的上下文摘要，填充执行提示词
//! 2. 从模型回复中按工具提取载荷（SQL / Python 代码 / 绘图 JSON），记为步骤 input
//! 3. 调度到对应工具；需要前序结果的工具拿到规范化后的完整上下文
//! 4. 解释结果：恢复其中的 JSON；数据类工具的非 JSON 文本包装为 {"error", "data": []}（提前结束的运行除外）
//! 5. 结果带 error 则步骤失败、记入错误日志且索引不前进（下个周期原地重试），否则完成并前进
//!
//! 步骤内的任何失败都不会向上抛出，只体现在错误日志、步骤输出和历史记录中。

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{json, Value};

use crate::core::{AgentError, FailureKind, PlanStep, SessionState};
use crate::llm::{invoke, LlmClient};
use crate::memory::ContextManager;
use crate::parser::{extract_code, extract_json};
use crate::tools::{CodeRun, ExecutionContext, ToolCall, ToolExecutor, ToolKind};
use crate::workflow::prompts::{PromptKind, PromptTemplates};

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)//.*$").expect("static regex"));

const DEFAULT_CHART_FILENAME: &str = "plot.png";

/// 一个周期的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed {
        step_id: String,
    },
    Failed {
        step_id: String,
        kind: FailureKind,
        detail: String,
    },
    /// 当前索引处没有步骤
    Idle,
}

/// 一次尝试：提取出的工具载荷，以及工具结果或失败原因
struct Attempt {
    input: Option<Value>,
    result: Result<Value, AgentError>,
}

impl Attempt {
    fn failed(input: Option<Value>, err: AgentError) -> Self {
        Self {
            input,
            result: Err(err),
        }
    }
}

pub struct StepExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    prompts: Arc<PromptTemplates>,
    context: ContextManager,
}

impl StepExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        prompts: Arc<PromptTemplates>,
        context: ContextManager,
    ) -> Self {
        Self {
            llm,
            tools,
            prompts,
            context,
        }
    }

    /// 执行 current_step_index 处的步骤并就地更新会话状态
    pub async fn execute(&self, state: &mut SessionState) -> StepOutcome {
        let idx = state.current_step_index;
        let total = state.plan.len();
        let Some(step) = state.plan.get_mut(idx) else {
            return StepOutcome::Idle;
        };
        step.begin();
        let step = step.clone();
        tracing::info!(
            session_id = %state.session_id,
            step = idx + 1,
            total,
            task = %step.task,
            tool = %step.tool.name(),
            "executing step"
        );

        let Attempt { input, result } = self.attempt(&step, state).await;
        state.plan[idx].input = input;

        match result {
            Err(err) => {
                let kind = FailureKind::from(&err);
                let message = format!("执行出错: {err}");
                tracing::error!(session_id = %state.session_id, step_id = %step.id, error = %err, "step failed");
                state.plan[idx].fail(Value::String(message.clone()));
                state.record_error(message);
                state.note(format!("步骤【{}】执行失败: {err}", step.task));
                StepOutcome::Failed {
                    step_id: step.id,
                    kind,
                    detail: err.to_string(),
                }
            }
            Ok(value) => match detect_error(&value) {
                Some(detail) => {
                    tracing::error!(session_id = %state.session_id, step_id = %step.id, error = %detail, "step result carries an error");
                    state.plan[idx].fail(value);
                    state.record_error(format!("Step {} failed: {detail}", step.id));
                    state.note(format!("步骤【{}】执行失败: {detail}", step.task));
                    StepOutcome::Failed {
                        step_id: step.id,
                        kind: FailureKind::ResultError,
                        detail,
                    }
                }
                None => {
                    state.plan[idx].complete(value.clone());
                    state.context.insert(step.id.clone(), value);
                    state.current_step_index = idx + 1;
                    state.note(format!("步骤【{}】执行完成。", step.task));
                    tracing::info!(session_id = %state.session_id, step_id = %step.id, "step completed");
                    StepOutcome::Completed { step_id: step.id }
                }
            },
        }
    }

    async fn attempt(&self, step: &PlanStep, state: &SessionState) -> Attempt {
        let Some(kind) = step.tool.kind() else {
            return Attempt::failed(None, AgentError::UnknownTool(step.tool.name().to_string()));
        };

        let schema = if kind == ToolKind::Query {
            match self.tools.query_schema().await {
                Ok(schema) => schema,
                Err(e) => return Attempt::failed(None, e),
            }
        } else {
            String::new()
        };

        let summary = self.context.summarize(&state.context);
        let prompt = self.prompts.render(
            PromptKind::Execution,
            &[
                ("task", step.task.as_str()),
                ("tool", kind.as_str()),
                ("context_summary", summary.as_str()),
                ("schema", schema.as_str()),
            ],
        );
        let reply = match invoke(self.llm.as_ref(), &prompt).await {
            Ok(reply) => reply,
            Err(e) => return Attempt::failed(None, e),
        };
        tracing::debug!(step_id = %step.id, reply = %reply, "execution reply");

        let call = match kind {
            ToolKind::Query => ToolCall::Query {
                sql: extract_code(&reply, kind.code_language()),
            },
            ToolKind::CodeAnalysis => {
                let code = extract_code(&reply, kind.code_language());
                let input = Some(Value::String(code.clone()));
                if code.is_empty() {
                    return Attempt::failed(
                        input,
                        AgentError::ToolExecutionFailed("模型生成的 Python 代码为空".into()),
                    );
                }
                // 模型有时不写代码而是直接给出错误对象
                if let Some(direct) = direct_error_object(&code) {
                    return Attempt {
                        input,
                        result: Ok(direct),
                    };
                }
                ToolCall::Analyze {
                    code,
                    context: ExecutionContext::new(self.context.normalize(&state.context)),
                }
            }
            ToolKind::Visualization => {
                let (plot_code, filename) =
                    parse_chart_request(&extract_code(&reply, kind.code_language()));
                ToolCall::Chart {
                    plot_code,
                    filename: scoped_chart_filename(&state.session_id, &step.id, &filename),
                    context: ExecutionContext::new(self.context.normalize(&state.context)),
                }
            }
        };

        let input = Some(call_input(&call));
        match self.tools.dispatch(call).await {
            Ok(run) => Attempt {
                input,
                result: Ok(interpret_run(kind, run)),
            },
            Err(e) => Attempt::failed(input, e),
        }
    }
}

fn call_input(call: &ToolCall) -> Value {
    match call {
        ToolCall::Query { sql } => Value::String(sql.clone()),
        ToolCall::Analyze { code, .. } => Value::String(code.clone()),
        ToolCall::Chart {
            plot_code,
            filename,
            ..
        } => json!({ "plot_code": plot_code, "filename": filename }),
    }
}

fn direct_error_object(code: &str) -> Option<Value> {
    let trimmed = code.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| v.get("error").is_some())
}

/// 图片目录被所有会话共用，文件名加上会话与步骤前缀，互不覆盖
pub fn scoped_chart_filename(session_id: &str, step_id: &str, filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let base = if base.is_empty() { DEFAULT_CHART_FILENAME } else { base };
    format!("{session_id}_{step_id}_{base}")
}

/// 解释工具原始输出
///
/// 能恢复出 JSON 就使用 JSON；否则数据类工具包装为 {"error": 原文, "data": []}，
/// 其他工具保留原文。
pub fn interpret_result(kind: ToolKind, raw: &str) -> Value {
    if let Some(value) = extract_json(raw) {
        return value;
    }
    let trimmed = raw.trim_start();
    let json_like = trimmed.starts_with('{') || trimmed.starts_with('[');
    if !json_like && kind.is_data_producing() {
        json!({ "error": raw, "data": [] })
    } else {
        Value::String(raw.to_string())
    }
}

/// 解释一次工具运行；提前结束的运行是正常结果，非 JSON 输出保留原文而不包装为错误
pub fn interpret_run(kind: ToolKind, run: CodeRun) -> Value {
    match run {
        CodeRun::Completed(raw) => interpret_result(kind, &raw),
        CodeRun::Halted(raw) => extract_json(&raw).unwrap_or(Value::String(raw)),
    }
}

/// 结果中的错误标记：顶层对象的 "error" 键，或列表首元素的 "error" 键
pub fn detect_error(value: &Value) -> Option<String> {
    let error = match value {
        Value::Object(obj) => obj.get("error"),
        Value::Array(items) => items.first().and_then(|first| first.get("error")),
        _ => None,
    }?;
    Some(match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// 解析绘图请求：{"plot_code" | "code" | "viz_data": {...}, "filename"}
///
/// 依次尝试：原文、去掉 // 注释后的文本（都允许字符串内出现裸换行），最后从文本中恢复 JSON；
/// 都失败时把整段文本当作绘图代码。
pub fn parse_chart_request(payload: &str) -> (String, String) {
    let stripped = LINE_COMMENT.replace_all(payload, "");
    let parsed = [payload, stripped.as_ref()]
        .iter()
        .find_map(|text| parse_lenient(text))
        .filter(Value::is_object)
        .or_else(|| extract_json(&escape_raw_controls(payload)).filter(Value::is_object));

    let Some(obj) = parsed else {
        return (payload.to_string(), DEFAULT_CHART_FILENAME.to_string());
    };

    let code_of = |v: &Value| {
        ["plot_code", "code"]
            .iter()
            .filter_map(|k| v.get(*k).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    let plot_code = code_of(&obj)
        .or_else(|| obj.get("viz_data").and_then(code_of))
        .unwrap_or_default();
    let filename = obj
        .get("filename")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_CHART_FILENAME)
        .to_string();
    (plot_code, filename)
}

fn parse_lenient(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim())
        .ok()
        .or_else(|| serde_json::from_str(escape_raw_controls(text).trim()).ok())
}

/// 把 JSON 字符串字面量中的裸换行 / 制表符转义，模型写多行代码时常见
fn escape_raw_controls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_recovers_json_from_stdout() {
        let raw = "中间结果 {\"debug\": 1}\n{\"result\": {\"cagr\": 0.12}}\n";
        assert_eq!(
            interpret_result(ToolKind::CodeAnalysis, raw),
            json!({"result": {"cagr": 0.12}})
        );
    }

    #[test]
    fn test_interpret_wraps_plain_text_from_data_tools() {
        assert_eq!(
            interpret_result(ToolKind::CodeAnalysis, "Traceback: boom"),
            json!({"error": "Traceback: boom", "data": []})
        );
        assert_eq!(
            interpret_result(ToolKind::Query, "plain"),
            Value::String("plain".into())
        );
    }

    #[test]
    fn test_halted_run_is_not_wrapped_as_error() {
        let halted = interpret_run(
            ToolKind::CodeAnalysis,
            CodeRun::Halted("数据不足，提前结束".into()),
        );
        assert_eq!(halted, Value::String("数据不足，提前结束".into()));
        assert_eq!(detect_error(&halted), None);

        let completed = interpret_run(
            ToolKind::CodeAnalysis,
            CodeRun::Completed("数据不足，提前结束".into()),
        );
        assert!(detect_error(&completed).is_some());
    }

    #[test]
    fn test_detect_error_in_object_and_first_row() {
        assert_eq!(detect_error(&json!({"error": "no such table"})), Some("no such table".into()));
        assert_eq!(detect_error(&json!([{"error": {"code": 1}}])), Some("{\"code\":1}".into()));
        assert_eq!(detect_error(&json!([{"a": 1}, {"error": "late"}])), None);
        assert_eq!(detect_error(&json!({"warning": "Query returned 0 rows", "data": []})), None);
        assert_eq!(detect_error(&json!("error")), None);
    }

    #[test]
    fn test_chart_request_with_multiline_code_and_comments() {
        let payload = "{\n  \"plot_code\": \"import matplotlib.pyplot as plt\nplt.bar([1], [2])\", // 绘图\n  \"filename\": \"bar.png\"\n}";
        let (code, filename) = parse_chart_request(payload);
        assert_eq!(code, "import matplotlib.pyplot as plt\nplt.bar([1], [2])");
        assert_eq!(filename, "bar.png");
    }

    #[test]
    fn test_chart_request_nested_and_defaults() {
        let (code, filename) =
            parse_chart_request(r#"{"viz_data": {"code": "plt.plot([1, 2])"}}"#);
        assert_eq!(code, "plt.plot([1, 2])");
        assert_eq!(filename, "plot.png");

        let (code, filename) = parse_chart_request("plt.plot([3])");
        assert_eq!(code, "plt.plot([3])");
        assert_eq!(filename, "plot.png");
    }

    #[test]
    fn test_chart_filename_scoped_per_session_and_step() {
        assert_eq!(
            scoped_chart_filename("s-1", "step_3", "bar.png"),
            "s-1_step_3_bar.png"
        );
        assert_eq!(
            scoped_chart_filename("s-1", "step_3", "../../tmp/bar.png"),
            "s-1_step_3_bar.png"
        );
        assert_ne!(
            scoped_chart_filename("s-1", "step_3", "plot.png"),
            scoped_chart_filename("s-2", "step_3", "plot.png")
        );
        assert_eq!(scoped_chart_filename("s-1", "step_2", " "), "s-1_step_2_plot.png");
    }

    #[test]
    fn test_direct_error_object_only_with_error_key() {
        assert!(direct_error_object(r#"{"error": "数据不足"}"#).is_some());
        assert!(direct_error_object(r#"{"result": 1}"#).is_none());
        assert!(direct_error_object("print(1)").is_none());
    }
}
