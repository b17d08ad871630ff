//! 任务理解节点：把自由文本需求转为结构化的 Understanding

use crate::core::{AgentError, SessionState, Understanding, WorkflowPhase};
use crate::llm::{invoke_structured, LlmClient};
use crate::workflow::prompts::{PromptKind, PromptTemplates};

/// 理解任务并重置会话的计划与执行进度
pub async fn understand(
    llm: &dyn LlmClient,
    prompts: &PromptTemplates,
    state: &mut SessionState,
) -> Result<(), AgentError> {
    tracing::info!(
        session_id = %state.session_id,
        input = %state.input.chars().take(50).collect::<String>(),
        "understanding task"
    );
    let prompt = prompts.render(PromptKind::Understanding, &[("input", state.input.as_str())]);
    let understanding: Understanding = invoke_structured(llm, &prompt).await?;

    state.note(format!("任务理解完成：{}", understanding.goal));
    state.understanding = understanding;
    state.context.clear();
    state.plan.clear();
    state.current_step_index = 0;
    state.is_approved = false;
    state.awaiting_approval = false;
    state.errors.clear();
    state.phase = WorkflowPhase::Planning;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_understanding_resets_progress() {
        let mock = MockLlmClient::scripted([
            r#"{"goal": "比较光伏企业盈利能力", "data_scope": "A 股光伏", "time_dimension": "2023",
                "business_context": "投资研究", "key_metrics": ["gross_margin"], "constraints": []}"#,
        ]);
        let mut state = SessionState::new("s1", "帮我分析光伏企业的盈利能力");
        state.errors.push("old".into());
        state.current_step_index = 2;

        understand(&mock, &PromptTemplates::builtin(), &mut state)
            .await
            .unwrap();

        assert_eq!(state.understanding.goal, "比较光伏企业盈利能力");
        assert_eq!(state.phase, WorkflowPhase::Planning);
        assert!(state.errors.is_empty());
        assert_eq!(state.current_step_index, 0);
        assert_eq!(
            state.history.last().unwrap().content,
            "任务理解完成：比较光伏企业盈利能力"
        );
        assert!(mock.prompts()[0].contains("帮我分析光伏企业的盈利能力"));
    }
}
