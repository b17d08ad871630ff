//! Analyst - LLM 驱动的多步骤数据分析编排引擎
//!
//! 把自由文本的分析需求转为结构化计划，经人工确认后逐步调用工具执行，最后生成报告；
//! 会话状态每一步都写入检查点，进程重启后可继续。
//!
//! 模块划分：
//! - **agent**: 从配置装配 AnalysisService（LLM、工具、检查点）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态与错误类型
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与结构化调用
//! - **memory**: 会话历史、步骤结果上下文（截断与规范化）、检查点存储
//! - **parser**: 从模型输出中恢复代码块与 JSON
//! - **service**: 对外操作 start / feedback / status
//! - **tools**: 封闭工具集（SQL 查询、Python 分析、绘图）与执行器
//! - **workflow**: 工作流状态机、步骤执行器、审批闸门与各节点

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod parser;
pub mod service;
pub mod tools;
pub mod workflow;

pub use agent::create_service;
pub use config::{load_config, AppConfig};
pub use core::{AgentError, SessionState};
pub use service::{AnalysisService, FeedbackResponse, StartResponse, TaskStatus};
