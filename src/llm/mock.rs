//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预置回复，并记录收到的每条提示词，便于断言提示词内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;

/// 脚本化的 Mock 客户端；脚本用完后返回 fallback，没有 fallback 则报错
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定回复
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for reply in replies {
            mock.push_reply(reply);
        }
        mock
    }

    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(reply.into()));
        }
    }

    /// 下一次调用返回错误（模拟网络或配额失败）
    pub fn push_error(&self, error: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error.into()));
        }
    }

    /// 已收到的提示词（每次调用取最后一条消息）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let prompt = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt);
        }

        let next = self
            .script
            .lock()
            .map_err(|_| "mock script poisoned".to_string())?
            .pop_front();
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| "mock script exhausted".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let mock = MockLlmClient::scripted(["first", "second"]);
        mock.push_error("quota exceeded");

        let msgs = [Message::user("q1")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "second");
        assert_eq!(mock.complete(&msgs).await.unwrap_err(), "quota exceeded");
        assert!(mock.complete(&msgs).await.is_err());
        assert_eq!(mock.prompts().len(), 4);
    }

    #[tokio::test]
    async fn test_fallback_after_script() {
        let mock = MockLlmClient::new().with_fallback("{}");
        assert_eq!(mock.complete(&[Message::user("x")]).await.unwrap(), "{}");
    }
}
