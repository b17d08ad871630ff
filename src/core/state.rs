//! 会话状态：计划步骤、工作流阶段与可检查点化的完整快照
//!
//! SessionState 由 WorkflowController 独占；每次状态转移之后整体写入检查点存储，
//! 重启后从最近一次检查点继续，不依赖任何进程内状态。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;
use crate::tools::ToolSelector;

/// 步骤结果上下文：步骤 ID -> 结果载荷（结构化值或原始文本），按插入顺序保存
pub type Context = serde_json::Map<String, Value>;

/// 对任务的结构化理解
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Understanding {
    /// 分析目标
    pub goal: String,
    /// 数据范围
    pub data_scope: String,
    /// 时间维度
    pub time_dimension: String,
    /// 业务背景
    pub business_context: String,
    /// 关键分析指标
    pub key_metrics: Vec<String>,
    /// 分析约束或特殊要求
    pub constraints: Vec<String>,
}

/// 步骤生命周期：pending -> in_progress -> {completed | failed}；失败的步骤原地重试
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// 计划中的一个步骤，绑定唯一一个工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub tool: ToolSelector,
    pub status: StepStatus,
    /// 从模型回复中提取出的工具载荷（SQL / 代码 / 绘图参数）
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
}

impl PlanStep {
    pub fn new(
        id: impl Into<String>,
        task: impl Into<String>,
        tool: impl Into<ToolSelector>,
    ) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            dependencies: Vec::new(),
            tool: tool.into(),
            status: StepStatus::Pending,
            input: None,
            output: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// 进入执行；failed 的步骤重新进入时同样回到 in_progress
    pub fn begin(&mut self) {
        debug_assert!(
            matches!(self.status, StepStatus::Pending | StepStatus::Failed),
            "step {} entered from {:?}",
            self.id,
            self.status
        );
        self.status = StepStatus::InProgress;
    }

    pub fn complete(&mut self, output: Value) {
        self.status = StepStatus::Completed;
        self.output = Some(output);
    }

    pub fn fail(&mut self, output: Value) {
        self.status = StepStatus::Failed;
        self.output = Some(output);
    }
}

/// 会话结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// 报告已生成
    Completed,
    /// 错误日志超过预算，未生成报告
    ErrorBudgetExceeded,
}

/// 工作流阶段；AwaitingApproval 是显式的挂起态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum WorkflowPhase {
    Understanding,
    Planning,
    AwaitingApproval,
    Executing,
    Reporting,
    Terminated { reason: TerminationReason },
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowPhase::Terminated { .. })
    }
}

/// 一个分析任务的完整状态（按 session_id 检查点化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// 用户原始请求
    pub input: String,
    pub understanding: Understanding,
    pub plan: Vec<PlanStep>,
    pub current_step_index: usize,
    pub context: Context,
    /// 只追加
    pub history: Vec<Message>,
    /// 只追加；长度是唯一的失败终止信号
    pub errors: Vec<String>,
    pub awaiting_approval: bool,
    pub is_approved: bool,
    pub report: Option<String>,
    pub phase: WorkflowPhase,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            input: input.into(),
            understanding: Understanding::default(),
            plan: Vec::new(),
            current_step_index: 0,
            context: Context::new(),
            history: Vec::new(),
            errors: Vec::new(),
            awaiting_approval: false,
            is_approved: false,
            report: None,
            phase: WorkflowPhase::Understanding,
        }
    }

    /// 最后一条历史是用户消息，说明挂起后已收到新的人工反馈
    pub fn has_pending_feedback(&self) -> bool {
        self.history.last().map(Message::is_user).unwrap_or(false)
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.as_str())
    }

    pub fn note(&mut self, content: impl Into<String>) {
        self.history.push(Message::assistant(content));
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolKind;

    #[test]
    fn test_state_survives_json_round_trip() {
        let mut state = SessionState::new("s1", "分析光伏行业");
        state.plan.push(PlanStep::new("step_1", "查询营收", ToolKind::Query));
        state.plan.push(PlanStep::new("step_2", "检索新闻", "web_search".to_string()));
        state.context.insert("step_0".into(), serde_json::json!([{"a": 1}]));
        state.phase = WorkflowPhase::Terminated {
            reason: TerminationReason::ErrorBudgetExceeded,
        };

        let json = serde_json::to_string(&state).unwrap();
        let restored: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_pending_feedback_only_after_user_turn() {
        let mut state = SessionState::new("s1", "x");
        assert!(!state.has_pending_feedback());
        state.note("任务规划完成，请确认执行计划。");
        assert!(!state.has_pending_feedback());
        state.history.push(Message::user("同意"));
        assert!(state.has_pending_feedback());
        assert_eq!(state.last_user_message(), Some("同意"));
    }

    #[test]
    fn test_failed_step_can_be_reentered() {
        let mut step = PlanStep::new("step_1", "t", ToolKind::CodeAnalysis);
        step.begin();
        step.fail(Value::String("boom".into()));
        step.begin();
        assert_eq!(step.status, StepStatus::InProgress);
    }
}
