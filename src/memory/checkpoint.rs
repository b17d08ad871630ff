//! 检查点存储
//!
//! 每次状态转移后整体写入 SessionState，重启后从最近一次快照继续。三种实现：
//! - MemoryCheckpointStore：进程内，保存序列化后的快照（与持久化实现同样经过一次 serde 往返）
//! - JsonFileCheckpointStore：每个会话一个 JSON 文件，先写临时文件再 rename
//! - SqliteCheckpointStore：只追加的 checkpoints 表，读取时取最新一行

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;

use crate::core::{AgentError, SessionState};

/// 检查点存储接口：按 session_id 保存 / 读取完整会话状态
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 保存快照；返回前必须已落地，保证同一会话的读后写一致
    async fn save(&self, state: &SessionState) -> Result<(), AgentError>;

    /// 读取最近一次快照；会话不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, AgentError>;
}

fn encode(state: &SessionState) -> Result<String, AgentError> {
    serde_json::to_string(state).map_err(|e| AgentError::Checkpoint(e.to_string()))
}

fn decode(raw: &str) -> Result<SessionState, AgentError> {
    serde_json::from_str(raw).map_err(|e| AgentError::Checkpoint(e.to_string()))
}

/// 会话 ID 会拼进文件路径，只允许字母数字、下划线与连字符
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 内存检查点
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &SessionState) -> Result<(), AgentError> {
        let raw = encode(state)?;
        self.snapshots
            .write()
            .await
            .insert(state.session_id.clone(), raw);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, AgentError> {
        match self.snapshots.read().await.get(session_id) {
            Some(raw) => decode(raw).map(Some),
            None => Ok(None),
        }
    }
}

/// JSON 文件检查点：<dir>/<session_id>.json
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn save(&self, state: &SessionState) -> Result<(), AgentError> {
        if !is_valid_session_id(&state.session_id) {
            return Err(AgentError::Checkpoint(format!(
                "invalid session id: {}",
                state.session_id
            )));
        }
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        let path = self.path_for(&state.session_id);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, AgentError> {
        if !is_valid_session_id(session_id) {
            return Ok(None);
        }
        let path = self.path_for(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => decode(&raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::Checkpoint(e.to_string())),
        }
    }
}

/// SQLite 检查点：每次保存追加一行（step 递增），读取最新一行
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// 打开（或创建）数据库文件并初始化表
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, AgentError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
            }
        }
        let conn = Connection::open(db_path).map_err(sqlite_err)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        Self::from_connection(Connection::open_in_memory().map_err(sqlite_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                step INTEGER NOT NULL,
                phase TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_session ON checkpoints(session_id, id);",
        )
        .map_err(sqlite_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 某个会话累计写入的检查点数
    pub async fn versions(&self, session_id: &str) -> Result<usize, AgentError> {
        let session_id = session_id.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE session_id = ?1",
                params![session_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(sqlite_err)
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AgentError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AgentError::Checkpoint("checkpoint connection poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AgentError::Internal(e.to_string()))?
    }
}

fn sqlite_err(e: rusqlite::Error) -> AgentError {
    AgentError::Checkpoint(e.to_string())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, state: &SessionState) -> Result<(), AgentError> {
        let raw = encode(state)?;
        let phase = serde_json::to_string(&state.phase)
            .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        let session_id = state.session_id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(sqlite_err)?;
            let step: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(step), -1) + 1 FROM checkpoints WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .map_err(sqlite_err)?;
            tx.execute(
                "INSERT INTO checkpoints (session_id, step, phase, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session_id, step, phase, raw, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(sqlite_err)?;
            tx.commit().map_err(sqlite_err)
        })
        .await
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, AgentError> {
        let session_id = session_id.to_string();
        let raw: Option<String> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT state FROM checkpoints WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sqlite_err)
            })
            .await?;
        raw.as_deref().map(decode).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkflowPhase;

    fn sample(session_id: &str) -> SessionState {
        let mut state = SessionState::new(session_id, "分析储能行业");
        state.note("任务理解完成：储能");
        state
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("missing").await.unwrap().is_none());

        let state = sample("s1");
        store.save(&state).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_json_file_store_overwrites_and_rejects_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path().join("checkpoints"));

        let mut state = sample("session_1");
        store.save(&state).await.unwrap();
        state.phase = WorkflowPhase::Planning;
        store.save(&state).await.unwrap();

        let loaded = store.load("session_1").await.unwrap().unwrap();
        assert_eq!(loaded.phase, WorkflowPhase::Planning);
        assert!(store.load("../etc/passwd").await.unwrap().is_none());
        assert!(store.save(&sample("../escape")).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_store_latest_checkpoint_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::open(dir.path().join("cp.db")).unwrap();

        let mut state = sample("s1");
        store.save(&state).await.unwrap();
        state.phase = WorkflowPhase::AwaitingApproval;
        state.awaiting_approval = true;
        store.save(&state).await.unwrap();
        store.save(&sample("s2")).await.unwrap();

        assert_eq!(store.versions("s1").await.unwrap(), 2);
        assert_eq!(store.load("s1").await.unwrap(), Some(state));
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.db");
        let state = sample("s1");
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.save(&state).await.unwrap();
        }
        let reopened = SqliteCheckpointStore::open(&path).unwrap();
        assert_eq!(reopened.load("s1").await.unwrap(), Some(state));
    }
}
