//! 封闭工具集
//!
//! 计划由模型生成，工具名是自由文本；落地为 ToolSelector：能识别的映射到 ToolKind，
//! 识别不了的原样保留为 Unknown，直到执行该步时才以 UnknownTool 失败。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 执行器支持的三类工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// 数据库查询
    Query,
    /// 沙箱代码分析
    CodeAnalysis,
    /// 图表渲染
    Visualization,
}

impl ToolKind {
    /// 计划与提示词中使用的工具名
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Query => "sql_query",
            ToolKind::CodeAnalysis => "python_analysis",
            ToolKind::Visualization => "visualizer",
        }
    }

    /// 从模型回复中提取载荷时优先匹配的代码块语言标签
    pub fn code_language(&self) -> &'static str {
        match self {
            ToolKind::Query => "sql",
            ToolKind::CodeAnalysis => "python",
            ToolKind::Visualization => "json",
        }
    }

    /// 产出数据的工具：结果不是 JSON 时包装为 {"error", "data": []}
    pub fn is_data_producing(&self) -> bool {
        matches!(self, ToolKind::CodeAnalysis | ToolKind::Visualization)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sql_query" | "sql" | "query" | "query_tool" => Ok(ToolKind::Query),
            "python_analysis" | "python" | "code_analysis" | "analysis" => {
                Ok(ToolKind::CodeAnalysis)
            }
            "visualizer" | "visualization" | "chart" | "plot" => Ok(ToolKind::Visualization),
            other => Err(format!("未知的工具: {other}")),
        }
    }
}

/// 计划步骤上的工具选择器，序列化为纯字符串
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolSelector {
    Known(ToolKind),
    Unknown(String),
}

impl ToolSelector {
    pub fn kind(&self) -> Option<ToolKind> {
        match self {
            ToolSelector::Known(kind) => Some(*kind),
            ToolSelector::Unknown(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolSelector::Known(kind) => kind.as_str(),
            ToolSelector::Unknown(name) => name,
        }
    }
}

impl From<ToolKind> for ToolSelector {
    fn from(kind: ToolKind) -> Self {
        ToolSelector::Known(kind)
    }
}

impl From<String> for ToolSelector {
    fn from(raw: String) -> Self {
        match raw.parse::<ToolKind>() {
            Ok(kind) => ToolSelector::Known(kind),
            Err(_) => ToolSelector::Unknown(raw),
        }
    }
}

impl From<ToolSelector> for String {
    fn from(selector: ToolSelector) -> Self {
        selector.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_kind() {
        assert_eq!("SQL_QUERY".parse::<ToolKind>(), Ok(ToolKind::Query));
        assert_eq!("python".parse::<ToolKind>(), Ok(ToolKind::CodeAnalysis));
        assert_eq!("chart".parse::<ToolKind>(), Ok(ToolKind::Visualization));
    }

    #[test]
    fn test_unknown_selector_survives_serde() {
        let selector: ToolSelector = serde_json::from_str(r#""web_search""#).unwrap();
        assert_eq!(selector, ToolSelector::Unknown("web_search".to_string()));
        assert_eq!(serde_json::to_string(&selector).unwrap(), r#""web_search""#);

        let known: ToolSelector = serde_json::from_str(r#""visualizer""#).unwrap();
        assert_eq!(known.kind(), Some(ToolKind::Visualization));
    }
}
