//! 编排层：工作流状态机与各节点

pub mod controller;
pub mod executor;
pub mod feedback;
pub mod planning;
pub mod prompts;
pub mod reporting;
pub mod understanding;

pub use controller::{route_after_execution, Flow, WorkflowController};
pub use executor::{
    detect_error, interpret_result, interpret_run, parse_chart_request, scoped_chart_filename,
    StepExecutor, StepOutcome,
};
pub use feedback::{FeedbackGate, GateDecision};
pub use prompts::{PromptKind, PromptTemplates};
pub use reporting::Reporter;
