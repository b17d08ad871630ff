//! 模型输出恢复：从自由文本中取出代码块与 JSON
//!
//! - `extract_code`：指定语言的围栏代码块 > 任意围栏代码块 > 去掉首尾反引号的原文
//! - `extract_json`：从每个 `{` / `[` 起做深度计数找到配对的闭合符，尝试解析每个平衡片段；
//!   有多个合法候选时，取最后一个含优先键的对象，否则取最后一个候选
//!
//! 两者都不会失败：找不到时分别退回原文与 None，由调用方决定如何降级。

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// 模型常在诊断输出之后给出最终结果，含这些键的对象优先
pub const PRIORITY_KEYS: &[&str] = &[
    "final_answer",
    "result",
    "data",
    "cleaned_data",
    "rankings",
    "composite_score",
];

static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n`]*\r?\n(.*?)```").expect("static regex")
});

/// 提取代码：`lang` 标签的第一个围栏块；没有则任意围栏块；再没有则返回去掉反引号的原文
pub fn extract_code(text: &str, lang: &str) -> String {
    let tagged = format!(r"(?si)```{}\b[ \t]*\r?\n?(.*?)```", regex::escape(lang));
    if let Ok(re) = Regex::new(&tagged) {
        if let Some(cap) = re.captures(text) {
            return cap[1].trim().to_string();
        }
    }

    if let Some(cap) = ANY_FENCE.captures(text) {
        return cap[1].trim().to_string();
    }

    text.trim().trim_matches('`').trim().to_string()
}

/// 一个能解析为 JSON 的平衡片段
#[derive(Debug, Clone)]
struct Candidate {
    end: usize,
    value: Value,
}

/// 从文本中恢复 JSON 值
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Some(value);
        }
    }

    let mut candidates = collect_candidates(text);
    if candidates.is_empty() {
        return None;
    }
    // 外层容器在其内部片段之后闭合，按闭合位置排序即「文本顺序」
    candidates.sort_by_key(|c| c.end);

    let mut distinct: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !distinct.iter().any(|c| c.value == candidate.value) {
            distinct.push(candidate);
        }
    }

    let preferred = distinct.iter().rev().find(|c| has_priority_key(&c.value));
    preferred
        .or_else(|| distinct.last())
        .map(|c| c.value.clone())
}

fn has_priority_key(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| PRIORITY_KEYS.iter().any(|k| obj.contains_key(*k)))
        .unwrap_or(false)
}

fn collect_candidates(text: &str) -> Vec<Candidate> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    for (start, &b) in bytes.iter().enumerate() {
        let close = match b {
            b'{' => b'}',
            b'[' => b']',
            _ => continue,
        };
        let Some(end) = matching_close(bytes, start, b, close) else {
            continue;
        };
        // 括号都是 ASCII，切片边界必在字符边界上
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
            out.push(Candidate { end, value });
        }
    }
    out
}

/// 从 start 处的开括号向后做深度计数，跳过字符串字面量中的括号
fn matching_close(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_code_tagged_block() {
        let text = "Here you go:\n```sql\nSELECT 1\n```\nDone.";
        assert_eq!(extract_code(text, "sql"), "SELECT 1");
    }

    #[test]
    fn test_extract_code_prefers_tagged_over_first_block() {
        let text = "```text\nnotes\n```\n```python\nprint(1)\n```";
        assert_eq!(extract_code(text, "python"), "print(1)");

        let sqlite = "```sqlite\nSELECT 4\n```";
        assert_eq!(extract_code(sqlite, "sql"), "SELECT 4");
    }

    #[test]
    fn test_extract_code_falls_back_to_any_block() {
        let text = "```py\nprint(2)\n```";
        assert_eq!(extract_code(text, "python"), "print(2)");
        let untagged = "```\nSELECT 2\n```";
        assert_eq!(extract_code(untagged, "sql"), "SELECT 2");
    }

    #[test]
    fn test_extract_code_without_fences_returns_trimmed_text() {
        assert_eq!(extract_code("  SELECT * FROM t  \n", "sql"), "SELECT * FROM t");
        assert_eq!(extract_code("`SELECT 3`", "sql"), "SELECT 3");
    }

    #[test]
    fn test_extract_json_single_span() {
        let text = "结果如下：{\"total\": 42, \"unit\": \"亿元\"} 以上。";
        assert_eq!(extract_json(text), Some(json!({"total": 42, "unit": "亿元"})));
    }

    #[test]
    fn test_extract_json_list_of_records_returns_whole_list() {
        let text = "rows: [{\"a\": 1}, {\"a\": 2}]";
        assert_eq!(extract_json(text), Some(json!([{"a": 1}, {"a": 2}])));
    }

    #[test]
    fn test_extract_json_prefers_priority_key_over_later_span() {
        let text = r#"{"result": [1, 2]} then some debugging {"debug": true}"#;
        assert_eq!(extract_json(text), Some(json!({"result": [1, 2]})));
    }

    #[test]
    fn test_extract_json_last_candidate_without_priority_keys() {
        let text = r#"first {"x": 1} second {"x": 2}"#;
        assert_eq!(extract_json(text), Some(json!({"x": 2})));
    }

    #[test]
    fn test_extract_json_ignores_braces_inside_strings() {
        let text = r#"output: {"msg": "use } carefully", "ok": true}"#;
        assert_eq!(
            extract_json(text),
            Some(json!({"msg": "use } carefully", "ok": true}))
        );
    }

    #[test]
    fn test_extract_json_none_when_unbalanced_or_invalid() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{not: valid}"), None);
        assert_eq!(extract_json("{\"open\": 1"), None);
    }
}
