//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）及结构化调用

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod structured;
pub mod traits;

pub use deepseek::{create_deepseek_client, has_deepseek_key, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{normalize_base_url, OpenAiClient, UsageStats};
pub use structured::{invoke, invoke_structured};
pub use traits::LlmClient;
