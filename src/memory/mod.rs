//! 记忆层：会话历史、步骤结果上下文、检查点

pub mod checkpoint;
pub mod context;
pub mod conversation;

pub use checkpoint::{
    is_valid_session_id, CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore,
    SqliteCheckpointStore,
};
pub use context::ContextManager;
pub use conversation::{Message, Role};
