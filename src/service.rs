//! 编排服务边界：start / feedback / status
//!
//! 会话之间互不共享可变状态；同一会话的并发调用由按 session_id 分配的异步锁串行化，
//! 保证检查点的「读后写」一致。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::core::{
    AgentError, PlanStep, SessionState, TerminationReason, Understanding, WorkflowPhase,
};
use crate::memory::{CheckpointStore, Message};
use crate::workflow::WorkflowController;

/// 对外暴露的任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    AwaitingApproval,
    InProgress,
    Completed,
    /// 错误超出预算，未生成报告
    Failed,
}

impl TaskStatus {
    pub fn of(state: &SessionState) -> Self {
        match state.phase {
            WorkflowPhase::AwaitingApproval => TaskStatus::AwaitingApproval,
            WorkflowPhase::Terminated {
                reason: TerminationReason::Completed,
            } => TaskStatus::Completed,
            WorkflowPhase::Terminated {
                reason: TerminationReason::ErrorBudgetExceeded,
            } => TaskStatus::Failed,
            _ => TaskStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub session_id: String,
    pub status: TaskStatus,
    pub understanding: Understanding,
    pub plan: Vec<PlanStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResponse {
    pub status: TaskStatus,
    pub current_step: usize,
    pub plan: Vec<PlanStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub errors: Vec<String>,
}

impl From<&SessionState> for FeedbackResponse {
    fn from(state: &SessionState) -> Self {
        Self {
            status: TaskStatus::of(state),
            current_step: state.current_step_index,
            plan: state.plan.clone(),
            report: state.report.clone(),
            errors: state.errors.clone(),
        }
    }
}

pub struct AnalysisService {
    controller: WorkflowController,
    store: Arc<dyn CheckpointStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AnalysisService {
    pub fn new(controller: WorkflowController) -> Self {
        let store = Arc::clone(controller.store());
        Self {
            controller,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// 没有其他调用方持有该会话的锁时，从表中移除
    async fn release_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // 表中一份 + 这里一份
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(session_id);
        }
    }

    /// 新建会话，运行理解与规划，停在审批点
    pub async fn start(&self, request: &str) -> Result<StartResponse, AgentError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let lock = self.session_lock(&session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(&session_id, request).await
        };
        self.release_lock(&session_id, lock).await;
        result
    }

    async fn start_locked(
        &self,
        session_id: &str,
        request: &str,
    ) -> Result<StartResponse, AgentError> {
        tracing::info!(session_id = %session_id, "starting session");
        let mut state = SessionState::new(session_id, request);
        self.store.save(&state).await?;
        self.controller.run(&mut state).await?;

        Ok(StartResponse {
            session_id: session_id.to_string(),
            status: TaskStatus::of(&state),
            understanding: state.understanding,
            plan: state.plan,
        })
    }

    /// 追加一条用户反馈并继续运行，直到下一次挂起或结束
    ///
    /// 会话不存在时直接返回，不占用锁表。
    pub async fn feedback(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<FeedbackResponse, AgentError> {
        self.status(session_id).await?;

        let lock = self.session_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.feedback_locked(session_id, text).await
        };
        self.release_lock(session_id, lock).await;
        result
    }

    async fn feedback_locked(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<FeedbackResponse, AgentError> {
        let mut state = self.status(session_id).await?;

        state.history.push(Message::user(text));
        self.store.save(&state).await?;
        if state.phase.is_terminal() {
            tracing::info!(session_id = %session_id, "feedback on a finished session");
        }
        self.controller.run(&mut state).await?;
        Ok(FeedbackResponse::from(&state))
    }

    /// 会话完整快照（只读）
    pub async fn status(&self, session_id: &str) -> Result<SessionState, AgentError> {
        self.store
            .load(session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }
}
