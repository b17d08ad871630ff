//! 提示词模板
//!
//! 四个命名模板（understanding / planning / execution / reporting）从提示词目录加载，
//! 文件缺失时使用编译进二进制的默认模板。占位符形如 `{name}`，单遍替换：
//! 替换进去的文本不会被再次展开，未知的 `{...}`（如模板里的 JSON 示例）原样保留。

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("static regex"));

/// 报告模板无法加载时的兜底文本
pub const REPORT_TEMPLATE_FALLBACK: &str = "（请根据分析结果生成报告）";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Understanding,
    Planning,
    Execution,
    Reporting,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        PromptKind::Understanding,
        PromptKind::Planning,
        PromptKind::Execution,
        PromptKind::Reporting,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PromptKind::Understanding => "understanding",
            PromptKind::Planning => "planning",
            PromptKind::Execution => "execution",
            PromptKind::Reporting => "reporting",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            PromptKind::Understanding => include_str!("../../config/prompts/understanding.txt"),
            PromptKind::Planning => include_str!("../../config/prompts/planning.txt"),
            PromptKind::Execution => include_str!("../../config/prompts/execution.txt"),
            PromptKind::Reporting => include_str!("../../config/prompts/reporting.txt"),
        }
    }
}

/// 已加载的提示词模板与报告模板
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<PromptKind, String>,
    report_template: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptTemplates {
    /// 只使用内置模板
    pub fn builtin() -> Self {
        Self {
            templates: PromptKind::ALL
                .iter()
                .map(|k| (*k, k.builtin().to_string()))
                .collect(),
            report_template: include_str!("../../config/templates/industry_research.md")
                .to_string(),
        }
    }

    /// 从目录加载 `<name>.txt`，缺失的用内置模板；报告模板缺失时使用兜底文本
    pub fn load(dir: &Path, report_template: &Path) -> Self {
        let mut templates = HashMap::new();
        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.txt", kind.name()));
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "using builtin prompt");
                    kind.builtin().to_string()
                }
            };
            templates.insert(kind, text);
        }

        let report_template = std::fs::read_to_string(report_template).unwrap_or_else(|e| {
            tracing::warn!(
                path = %report_template.display(),
                error = %e,
                "report template unavailable, using fallback"
            );
            REPORT_TEMPLATE_FALLBACK.to_string()
        });

        Self {
            templates,
            report_template,
        }
    }

    pub fn report_template(&self) -> &str {
        &self.report_template
    }

    pub fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> String {
        let template = self
            .templates
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.builtin());
        fill(template, vars)
    }
}

/// 单遍占位符替换
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_single_pass_and_keeps_unknown_braces() {
        let out = fill(
            "任务：{task}\n示例：{\"plot_code\": \"...\"} {unknown}",
            &[("task", "计算 {schema} 占比")],
        );
        assert_eq!(out, "任务：计算 {schema} 占比\n示例：{\"plot_code\": \"...\"} {unknown}");
    }

    #[test]
    fn test_builtin_templates_carry_expected_placeholders() {
        let prompts = PromptTemplates::builtin();
        let exec = prompts.render(
            PromptKind::Execution,
            &[
                ("task", "T"),
                ("tool", "sql_query"),
                ("context_summary", "{}"),
                ("schema", "CREATE TABLE x"),
            ],
        );
        assert!(exec.contains("当前任务：T"));
        assert!(exec.contains("CREATE TABLE x"));
        assert!(!exec.contains("{task}"));
        assert!(!exec.contains("{schema}"));
    }

    #[test]
    fn test_load_falls_back_per_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("planning.txt"), "PLAN {goal}").unwrap();
        let prompts = PromptTemplates::load(dir.path(), &dir.path().join("missing.md"));

        assert_eq!(prompts.render(PromptKind::Planning, &[("goal", "g")]), "PLAN g");
        assert!(prompts
            .render(PromptKind::Understanding, &[("input", "需求")])
            .contains("需求"));
        assert_eq!(prompts.report_template(), REPORT_TEMPLATE_FALLBACK);
    }
}
