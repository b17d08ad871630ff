//! 报告节点：汇总已完成步骤的结果与图表，按模板生成 Markdown 报告

use std::path::PathBuf;

use serde_json::Value;

use crate::core::{AgentError, SessionState, StepStatus, TerminationReason, WorkflowPhase};
use crate::llm::{invoke, LlmClient};
use crate::tools::ToolKind;
use crate::workflow::prompts::{PromptKind, PromptTemplates};

pub struct Reporter {
    /// 报告保存目录；None 时只写入会话状态
    output_dir: Option<PathBuf>,
    /// 单个步骤输出在提示词中的字符上限
    output_chars: usize,
}

impl Reporter {
    pub fn new(output_dir: Option<PathBuf>, output_chars: usize) -> Self {
        Self {
            output_dir,
            output_chars,
        }
    }

    /// 各完成步骤的任务、工具与（截断后的）结果
    pub fn analysis_results(&self, state: &SessionState) -> String {
        let mut out = String::new();
        for step in state.plan.iter().filter(|s| s.status == StepStatus::Completed) {
            let output = step.output.as_ref().map(render_output).unwrap_or_default();
            let output = if output.chars().count() > self.output_chars {
                let head: String = output.chars().take(self.output_chars).collect();
                format!("{head}...(数据过长已截断)")
            } else {
                output
            };
            out.push_str(&format!(
                "### {}\n- 工具: {}\n- 结果: {}\n\n",
                step.task,
                step.tool.name(),
                output
            ));
        }
        out
    }

    pub async fn report(
        &self,
        llm: &dyn LlmClient,
        prompts: &PromptTemplates,
        state: &mut SessionState,
    ) -> Result<(), AgentError> {
        tracing::info!(session_id = %state.session_id, "generating report");
        let analysis_results = self.analysis_results(state);
        let images = chart_paths(state);
        let images_info = if images.is_empty() {
            "（未生成图表）".to_string()
        } else {
            images
                .iter()
                .map(|p| format!("- 路径: {p}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let current_date = chrono::Local::now().format("%Y-%m-%d").to_string();

        let prompt = prompts.render(
            PromptKind::Reporting,
            &[
                ("current_date", current_date.as_str()),
                ("goal", state.understanding.goal.as_str()),
                ("business_context", state.understanding.business_context.as_str()),
                ("analysis_results", analysis_results.as_str()),
                ("images_info", images_info.as_str()),
                ("report_template", prompts.report_template()),
            ],
        );
        let report = invoke(llm, &prompt).await?;

        let saved = self.save(&report).await;
        state.note(format!(
            "数据分析报告已生成并保存至 {}。",
            saved.as_deref().unwrap_or("unknown")
        ));
        state.report = Some(report);
        state.phase = WorkflowPhase::Terminated {
            reason: TerminationReason::Completed,
        };
        Ok(())
    }

    /// 保存失败只记录警告，不影响报告本身
    async fn save(&self, report: &str) -> Option<String> {
        let dir = self.output_dir.as_ref()?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("report_{timestamp}.md"));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, report).await
        }
        .await;
        match result {
            Ok(()) => {
                tracing::info!(path = %path.display(), "report saved");
                Some(path.display().to_string())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to save report");
                None
            }
        }
    }
}

fn render_output(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 已完成的可视化步骤产出的图片路径
pub fn chart_paths(state: &SessionState) -> Vec<String> {
    state
        .plan
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .filter(|s| s.tool.kind() == Some(ToolKind::Visualization))
        .filter_map(|s| s.output.as_ref()?.get("path")?.as_str().map(str::to_string))
        .collect()
}
