//! 规划节点：生成结构化计划并进入待审批状态
//!
//! 所有步骤初始化为 pending；缺失或重复的步骤 ID 重新编号为 step_<n>；
//! 工具名无法识别的步骤照常保留，执行到该步时以 UnknownTool 失败。

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{AgentError, PlanStep, SessionState, WorkflowPhase};
use crate::llm::{invoke_structured, LlmClient};
use crate::tools::ToolSelector;
use crate::workflow::prompts::{PromptKind, PromptTemplates};

/// 模型输出的计划
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanDraft {
    /// 任务拆解后的执行步骤序列
    pub steps: Vec<StepDraft>,
}

/// 模型输出的单个步骤
#[derive(Debug, Deserialize, JsonSchema)]
pub struct StepDraft {
    /// 步骤 ID，如 step_1
    #[serde(default)]
    pub id: String,
    /// 步骤要完成的具体任务
    pub task: String,
    /// 依赖的步骤 ID
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 使用的工具：sql_query / python_analysis / visualizer
    pub tool: String,
}

/// 把模型草稿落地为计划步骤
pub fn build_plan(drafts: Vec<StepDraft>) -> Vec<PlanStep> {
    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(drafts.len());
    for (i, draft) in drafts.into_iter().enumerate() {
        let mut id = draft.id.trim().to_string();
        if id.is_empty() || seen.contains(&id) {
            let mut n = i + 1;
            id = format!("step_{n}");
            while seen.contains(&id) {
                n += 1;
                id = format!("step_{n}");
            }
        }
        seen.insert(id.clone());

        let tool = ToolSelector::from(draft.tool);
        if let ToolSelector::Unknown(name) = &tool {
            tracing::warn!(step_id = %id, tool = %name, "plan references unknown tool");
        }
        steps.push(PlanStep::new(id, draft.task, tool).with_dependencies(draft.dependencies));
    }
    steps
}

/// 之前的人工反馈，供重新规划时参考
fn revision_notes(state: &SessionState) -> String {
    let notes: Vec<String> = state
        .history
        .iter()
        .filter(|m| m.is_user())
        .map(|m| format!("- {}", m.content))
        .collect();
    if notes.is_empty() {
        "（无）".to_string()
    } else {
        notes.join("\n")
    }
}

/// 生成计划，并挂起等待人工确认
pub async fn plan(
    llm: &dyn LlmClient,
    prompts: &PromptTemplates,
    state: &mut SessionState,
) -> Result<(), AgentError> {
    tracing::info!(session_id = %state.session_id, goal = %state.understanding.goal, "planning task");
    let u = &state.understanding;
    let key_metrics = u.key_metrics.join(", ");
    let notes = revision_notes(state);
    let prompt = prompts.render(
        PromptKind::Planning,
        &[
            ("goal", u.goal.as_str()),
            ("data_scope", u.data_scope.as_str()),
            ("key_metrics", key_metrics.as_str()),
            ("business_context", u.business_context.as_str()),
            ("revision_notes", notes.as_str()),
        ],
    );

    let draft: PlanDraft = invoke_structured(llm, &prompt).await?;
    let steps = build_plan(draft.steps);
    if steps.is_empty() {
        tracing::warn!(session_id = %state.session_id, "planner returned an empty plan");
    }
    tracing::info!(session_id = %state.session_id, steps = steps.len(), "plan ready");

    state.plan = steps;
    state.current_step_index = 0;
    state.awaiting_approval = true;
    state.is_approved = false;
    state.note("任务规划完成，请确认执行计划。");
    state.phase = WorkflowPhase::AwaitingApproval;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepStatus;
    use crate::llm::MockLlmClient;
    use crate::memory::Message;
    use crate::tools::ToolKind;

    fn draft(id: &str, tool: &str) -> StepDraft {
        StepDraft {
            id: id.to_string(),
            task: format!("task {id}"),
            dependencies: vec![],
            tool: tool.to_string(),
        }
    }

    #[test]
    fn test_missing_and_duplicate_ids_are_renumbered() {
        let steps = build_plan(vec![
            draft("step_1", "sql_query"),
            draft("step_1", "python_analysis"),
            draft("", "visualizer"),
            draft("step_2", "web_search"),
        ]);
        let ids: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["step_1", "step_2", "step_3", "step_4"]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(steps[0].tool.kind(), Some(ToolKind::Query));
        assert_eq!(steps[3].tool, ToolSelector::Unknown("web_search".into()));
    }

    #[tokio::test]
    async fn test_plan_suspends_for_approval_and_sees_feedback() {
        let mock = MockLlmClient::scripted([
            r#"{"steps": [{"id": "step_1", "task": "查询营收", "tool": "sql_query"}]}"#,
        ]);
        let mut state = SessionState::new("s1", "x");
        state.understanding.goal = "营收对比".into();
        state.history.push(Message::user("请增加毛利率分析"));

        plan(&mock, &PromptTemplates::builtin(), &mut state)
            .await
            .unwrap();

        assert_eq!(state.plan.len(), 1);
        assert!(state.awaiting_approval);
        assert_eq!(state.phase, WorkflowPhase::AwaitingApproval);
        assert_eq!(state.history.last().unwrap().content, "任务规划完成，请确认执行计划。");
        assert!(mock.prompts()[0].contains("请增加毛利率分析"));
    }
}
