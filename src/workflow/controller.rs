//! 工作流控制器：Understanding → Planning → AwaitingApproval → Executing* → Reporting → Terminated
//!
//! 每个周期只运行一个节点，节点结束后整体保存检查点。AwaitingApproval 是显式的挂起态：
//! 没有新的人工反馈时 run 直接返回；外部追加一条用户消息后重新 run，即从同一个转移函数继续。
//! 节点级错误（模型不可用、结构化输出无法解析）直接返回，最近一次检查点保持不变。

use std::sync::Arc;

use crate::core::{AgentError, SessionState, TerminationReason, WorkflowPhase};
use crate::llm::LlmClient;
use crate::memory::CheckpointStore;
use crate::workflow::executor::{StepExecutor, StepOutcome};
use crate::workflow::feedback::FeedbackGate;
use crate::workflow::planning::plan;
use crate::workflow::prompts::PromptTemplates;
use crate::workflow::reporting::Reporter;
use crate::workflow::understanding::understand;

/// 一个周期之后控制器该做什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// 等待人工反馈
    Suspend,
    /// 会话已结束
    Halt,
}

/// 执行一个步骤之后的路由：错误超出预算即终止，其次继续执行剩余步骤，最后进入报告
pub fn route_after_execution(state: &SessionState, max_errors: usize) -> WorkflowPhase {
    if state.errors.len() > max_errors {
        WorkflowPhase::Terminated {
            reason: TerminationReason::ErrorBudgetExceeded,
        }
    } else if state.current_step_index < state.plan.len() {
        WorkflowPhase::Executing
    } else {
        WorkflowPhase::Reporting
    }
}

pub struct WorkflowController {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptTemplates>,
    executor: StepExecutor,
    gate: FeedbackGate,
    reporter: Reporter,
    store: Arc<dyn CheckpointStore>,
    max_errors: usize,
}

impl WorkflowController {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptTemplates>,
        executor: StepExecutor,
        gate: FeedbackGate,
        reporter: Reporter,
        store: Arc<dyn CheckpointStore>,
        max_errors: usize,
    ) -> Self {
        Self {
            llm,
            prompts,
            executor,
            gate,
            reporter,
            store,
            max_errors,
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// 连续推进直到挂起或结束；每个周期之后保存检查点
    pub async fn run(&self, state: &mut SessionState) -> Result<Flow, AgentError> {
        loop {
            let flow = self.advance(state).await?;
            self.store.save(state).await?;
            if flow != Flow::Continue {
                return Ok(flow);
            }
        }
    }

    /// 运行当前阶段对应的一个节点
    pub async fn advance(&self, state: &mut SessionState) -> Result<Flow, AgentError> {
        match state.phase {
            WorkflowPhase::Understanding => {
                understand(self.llm.as_ref(), &self.prompts, state).await?;
                Ok(Flow::Continue)
            }
            WorkflowPhase::Planning => {
                plan(self.llm.as_ref(), &self.prompts, state).await?;
                Ok(Flow::Continue)
            }
            WorkflowPhase::AwaitingApproval => {
                if !state.has_pending_feedback() {
                    tracing::info!(session_id = %state.session_id, "awaiting approval");
                    return Ok(Flow::Suspend);
                }
                self.gate.apply(state);
                Ok(Flow::Continue)
            }
            WorkflowPhase::Executing => {
                if let StepOutcome::Failed { step_id, kind, .. } = self.executor.execute(state).await {
                    tracing::warn!(
                        session_id = %state.session_id,
                        step_id = %step_id,
                        kind = ?kind,
                        errors = state.errors.len(),
                        "step will be retried while the error budget allows"
                    );
                }
                state.phase = route_after_execution(state, self.max_errors);
                if state.phase.is_terminal() {
                    tracing::error!(
                        session_id = %state.session_id,
                        errors = ?state.errors,
                        "too many errors, stopping without a report"
                    );
                    return Ok(Flow::Halt);
                }
                Ok(Flow::Continue)
            }
            WorkflowPhase::Reporting => {
                self.reporter
                    .report(self.llm.as_ref(), &self.prompts, state)
                    .await?;
                let (prompt_tokens, completion_tokens, total_tokens) = self.llm.token_usage();
                tracing::info!(
                    session_id = %state.session_id,
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                    "session completed"
                );
                Ok(Flow::Halt)
            }
            WorkflowPhase::Terminated { .. } => Ok(Flow::Halt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PlanStep;
    use crate::tools::ToolKind;

    fn state_with(steps: usize, index: usize, errors: usize) -> SessionState {
        let mut state = SessionState::new("s1", "x");
        for i in 0..steps {
            state
                .plan
                .push(PlanStep::new(format!("step_{}", i + 1), "t", ToolKind::Query));
        }
        state.current_step_index = index;
        state.errors = (0..errors).map(|i| format!("e{i}")).collect();
        state
    }

    #[test]
    fn test_routing_after_execution() {
        assert_eq!(route_after_execution(&state_with(2, 1, 0), 3), WorkflowPhase::Executing);
        assert_eq!(route_after_execution(&state_with(2, 2, 3), 3), WorkflowPhase::Reporting);
        assert_eq!(
            route_after_execution(&state_with(2, 1, 4), 3),
            WorkflowPhase::Terminated {
                reason: TerminationReason::ErrorBudgetExceeded
            }
        );
    }

    #[test]
    fn test_budget_checked_before_completion() {
        assert!(route_after_execution(&state_with(1, 1, 4), 3).is_terminal());
    }
}
