//! 审批闸门：按关键词把人工反馈分类为批准 / 驳回
//!
//! ASCII 关键词须出现在词首（"ok" 命中 "okay"，不命中 "book"），中文关键词按子串匹配，均不区分大小写。

use crate::config::WorkflowSection;
use crate::core::{SessionState, WorkflowPhase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    Rejected { feedback: String },
}

#[derive(Debug, Clone)]
pub struct FeedbackGate {
    keywords: Vec<String>,
}

impl Default for FeedbackGate {
    fn default() -> Self {
        Self::new(WorkflowSection::default().approval_keywords)
    }
}

impl FeedbackGate {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, text: &str) -> GateDecision {
        let lowered = text.to_lowercase();
        if self.keywords.iter().any(|k| contains_keyword(&lowered, k)) {
            GateDecision::Approved
        } else {
            GateDecision::Rejected {
                feedback: text.to_string(),
            }
        }
    }

    /// 对最后一条用户消息做判定并更新状态：批准进入执行，驳回清空计划回到规划
    pub fn apply(&self, state: &mut SessionState) -> GateDecision {
        let feedback = state.last_user_message().unwrap_or_default().to_string();
        tracing::info!(session_id = %state.session_id, feedback = %feedback, "feedback received");

        let decision = self.classify(&feedback);
        state.awaiting_approval = false;
        match &decision {
            GateDecision::Approved => {
                state.is_approved = true;
                state.note("好的，开始执行分析计划。");
                state.phase = WorkflowPhase::Executing;
            }
            GateDecision::Rejected { feedback } => {
                state.is_approved = false;
                state.plan.clear();
                state.current_step_index = 0;
                state.note(format!(
                    "收到您的反馈：'{feedback}'。我将根据您的要求调整计划。"
                ));
                state.phase = WorkflowPhase::Planning;
            }
        }
        decision
    }
}

fn contains_keyword(text: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return text.contains(keyword);
    }
    // 只要求词首边界：approved、okay 命中，book、eyes 不命中
    text.match_indices(keyword).any(|(start, _)| {
        !text[..start]
            .chars()
            .next_back()
            .map(|c| c.is_ascii_alphanumeric())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PlanStep;
    use crate::memory::Message;
    use crate::tools::ToolKind;

    #[test]
    fn test_affirmative_vocabulary() {
        let gate = FeedbackGate::default();
        for text in ["同意", "可以，开始吧", "OK", "Yes please", "please proceed.", "确认执行"] {
            assert_eq!(gate.classify(text), GateDecision::Approved, "{text}");
        }
    }

    #[test]
    fn test_ascii_keywords_match_at_word_start() {
        let gate = FeedbackGate::default();
        assert!(matches!(gate.classify("look at margins too"), GateDecision::Rejected { .. }));
        assert!(matches!(gate.classify("eyes on 2022"), GateDecision::Rejected { .. }));
        assert_eq!(gate.classify("ok，按这个来"), GateDecision::Approved);
        for text in ["approved", "Okay, go ahead", "OK'd", "Confirmed."] {
            assert_eq!(gate.classify(text), GateDecision::Approved, "{text}");
        }
    }

    #[test]
    fn test_rejection_clears_plan_but_keeps_context() {
        let gate = FeedbackGate::default();
        let mut state = SessionState::new("s1", "x");
        state.plan.push(PlanStep::new("step_1", "t", ToolKind::Query));
        state.context.insert("step_0".into(), serde_json::json!(1));
        state.awaiting_approval = true;
        state.history.push(Message::user("请增加 2022 年的数据"));

        let decision = gate.apply(&mut state);

        assert!(matches!(decision, GateDecision::Rejected { .. }));
        assert!(state.plan.is_empty());
        assert_eq!(state.context.len(), 1);
        assert_eq!(state.phase, WorkflowPhase::Planning);
        assert!(!state.awaiting_approval);
        assert_eq!(
            state.history.last().unwrap().content,
            "收到您的反馈：'请增加 2022 年的数据'。我将根据您的要求调整计划。"
        );
    }

    #[test]
    fn test_approval_moves_to_execution() {
        let gate = FeedbackGate::default();
        let mut state = SessionState::new("s1", "x");
        state.awaiting_approval = true;
        state.history.push(Message::user("同意"));

        assert_eq!(gate.apply(&mut state), GateDecision::Approved);
        assert!(state.is_approved);
        assert_eq!(state.phase, WorkflowPhase::Executing);
    }
}
