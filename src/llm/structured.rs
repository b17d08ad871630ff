//! 模型调用封装：文本调用与结构化调用
//!
//! 结构化调用在提示词末尾附上目标类型的 JSON Schema（schemars 生成），
//! 再用 ResponseParser 从回复中恢复 JSON 并反序列化。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::parser::extract_json;

/// 单条 user 提示词的文本调用
pub async fn invoke(llm: &dyn LlmClient, prompt: &str) -> Result<String, AgentError> {
    let reply = llm
        .complete(&[Message::user(prompt)])
        .await
        .map_err(AgentError::LlmError)?;
    tracing::debug!(reply_len = reply.len(), "llm reply");
    Ok(reply)
}

/// 结构化调用：返回按 T 反序列化后的值
pub async fn invoke_structured<T>(llm: &dyn LlmClient, prompt: &str) -> Result<T, AgentError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_string_pretty(&schema_for!(T))
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    let full_prompt = format!(
        "{prompt}\n\n请只输出一个符合以下 JSON Schema 的 JSON 对象，不要输出其他内容：\n{schema}"
    );

    let reply = invoke(llm, &full_prompt).await?;
    let value = extract_json(&reply).ok_or_else(|| {
        AgentError::JsonParseError(format!("no JSON found in reply: {}", preview(&reply)))
    })?;
    serde_json::from_value(value).map_err(|e| AgentError::JsonParseError(e.to_string()))
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Understanding;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_structured_reply_wrapped_in_prose() {
        let mock = MockLlmClient::scripted([
            "好的，理解如下：\n```json\n{\"goal\": \"对比营收\", \"key_metrics\": [\"revenue\"]}\n```",
        ]);
        let u: Understanding = invoke_structured(&mock, "分析").await.unwrap();
        assert_eq!(u.goal, "对比营收");
        assert_eq!(u.key_metrics, vec!["revenue".to_string()]);
        assert!(u.constraints.is_empty());
        assert!(mock.prompts()[0].contains("JSON Schema"));
    }

    #[tokio::test]
    async fn test_structured_reply_without_json_is_parse_error() {
        let mock = MockLlmClient::scripted(["抱歉，我无法回答"]);
        let err = invoke_structured::<Understanding>(&mock, "分析")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_llm_error() {
        let mock = MockLlmClient::new();
        mock.push_error("connection reset");
        let err = invoke(&mock, "x").await.unwrap_err();
        assert!(matches!(err, AgentError::LlmError(ref m) if m == "connection reset"));
    }
}
