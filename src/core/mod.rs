//! 核心层：错误类型与会话状态

pub mod error;
pub mod state;

pub use error::{AgentError, FailureKind};
pub use state::{
    Context, PlanStep, SessionState, StepStatus, TerminationReason, Understanding, WorkflowPhase,
};
