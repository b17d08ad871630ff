//! 步骤结果上下文的两种视图
//!
//! - 提示词视图（`summarize`）：只取最近几个步骤，长列表保留首尾、长文本按字符截断，
//!   保证无论累积多少数据，执行提示词都在模型输入预算之内。
//! - 工具视图（`normalize`）：把字符串形式的 JSON 解析回结构化值，并给表格记录补上规范字段别名，
//!   交给代码分析与可视化工具。该视图不截断。

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::config::{default_field_aliases, ContextSection, WorkflowSection};
use crate::core::state::Context;
use crate::parser::extract_json;

/// 上下文截断与规范化
#[derive(Debug, Clone)]
pub struct ContextManager {
    window: usize,
    list_threshold: usize,
    list_keep: usize,
    text_budget: usize,
    aliases: BTreeMap<String, String>,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self {
            window: 3,
            list_threshold: 20,
            list_keep: 10,
            text_budget: 5000,
            aliases: default_field_aliases(),
        }
    }
}

impl ContextManager {
    pub fn from_config(workflow: &WorkflowSection, context: &ContextSection) -> Self {
        Self {
            window: workflow.context_window,
            list_threshold: workflow.list_threshold,
            list_keep: workflow.list_keep,
            text_budget: workflow.text_budget_chars,
            aliases: context.field_aliases.clone(),
        }
    }

    /// 提示词中的上下文摘要（美化后的 JSON 文本，非 ASCII 字符原样输出）
    pub fn summarize(&self, context: &Context) -> String {
        let skip = context.len().saturating_sub(self.window);
        let recent: Map<String, Value> = context
            .iter()
            .skip(skip)
            .map(|(k, v)| (k.clone(), self.truncate_value(v)))
            .collect();
        serde_json::to_string_pretty(&recent).unwrap_or_else(|_| "{}".to_string())
    }

    /// 截断单个结果：长列表保留首尾并插入省略标记，长文本按字符预算截断
    pub fn truncate_value(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) if items.len() > self.list_threshold => {
                let keep = self.list_keep.min(items.len() / 2);
                let elided = items.len() - keep * 2;
                let mut out = Vec::with_capacity(keep * 2 + 1);
                out.extend_from_slice(&items[..keep]);
                out.push(json!({
                    "...": format!(
                        "已截断 {elided} 条数据，仅显示头部和尾部各 {keep} 条以供参考"
                    )
                }));
                out.extend_from_slice(&items[items.len() - keep..]);
                Value::Array(out)
            }
            Value::String(text) if text.chars().count() > self.text_budget => {
                let head: String = text.chars().take(self.text_budget).collect();
                Value::String(format!(
                    "{head}...(此处仅为提示词中的截断，工具执行环境中的 context 包含完整数据)"
                ))
            }
            other => other.clone(),
        }
    }

    /// 工具视图：解析字符串中的 JSON，并为表格记录补充字段别名
    pub fn normalize(&self, context: &Context) -> Context {
        context
            .iter()
            .map(|(k, v)| (k.clone(), self.apply_aliases(parse_embedded(v))))
            .collect()
    }

    fn apply_aliases(&self, value: Value) -> Value {
        match value {
            Value::Array(items) if items.iter().all(Value::is_object) => {
                Value::Array(items.into_iter().map(|row| self.alias_row(row)).collect())
            }
            Value::Object(mut obj) if obj.get("data").map(Value::is_array).unwrap_or(false) => {
                if let Some(Value::Array(rows)) = obj.remove("data") {
                    let rows = rows.into_iter().map(|row| self.alias_row(row)).collect();
                    obj.insert("data".to_string(), Value::Array(rows));
                }
                Value::Object(obj)
            }
            other => other,
        }
    }

    /// 每条记录同时保留原字段名与规范别名，指向同一个值
    fn alias_row(&self, row: Value) -> Value {
        let Value::Object(fields) = row else {
            return row;
        };
        let mut out = Map::with_capacity(fields.len());
        for (key, val) in fields {
            let alias = self.aliases.get(&key).cloned();
            out.insert(key, val.clone());
            if let Some(alias) = alias {
                out.insert(alias, val);
            }
        }
        Value::Object(out)
    }
}

/// 字符串形态的值：像 JSON 就直接解析，否则尝试从中恢复 JSON，都不行就原样保留
fn parse_embedded(value: &Value) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    let trimmed = text.trim();
    let looks_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_json {
        if let Ok(parsed) = serde_json::from_str(trimmed) {
            return parsed;
        }
    }
    extract_json(text).unwrap_or_else(|| value.clone())
}
