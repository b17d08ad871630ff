//! SQLite 查询工具
//!
//! 每次调用在阻塞线程中打开连接执行；结果为行对象数组（最多 max_rows 行）。
//! SQL 错误不视为工具故障，而是以 {"error": ...} 返回，交给 StepExecutor 记入错误日志。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Map, Number, Value};

use crate::tools::QueryTool;

/// schema 描述中每张表附带的示例行数
const SAMPLE_ROWS: usize = 3;

pub struct SqliteQueryTool {
    db_path: PathBuf,
    max_rows: usize,
}

impl SqliteQueryTool {
    pub fn new(db_path: impl AsRef<Path>, max_rows: usize) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            max_rows: max_rows.max(1),
        }
    }

    fn connect(path: &Path) -> Result<Connection, String> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| format!("无法打开数据库 {}: {e}", path.display()))
    }
}

/// 执行一条语句并按约定格式化结果
fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Value {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => return json!({ "error": e.to_string() }),
    };

    if stmt.column_count() == 0 {
        return match stmt.execute([]) {
            Ok(affected) => json!({
                "status": "success",
                "message": format!("Query executed successfully (no rows returned, {affected} affected)"),
            }),
            Err(e) => json!({ "error": e.to_string() }),
        };
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(e) => return json!({ "error": e.to_string() }),
    };

    let mut out = Vec::new();
    loop {
        if out.len() >= max_rows {
            break;
        }
        match rows.next() {
            Ok(Some(row)) => {
                let mut obj = Map::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    let value = row.get_ref(i).map(to_json).unwrap_or(Value::Null);
                    obj.insert(name.clone(), value);
                }
                out.push(Value::Object(obj));
            }
            Ok(None) => break,
            Err(e) => return json!({ "error": e.to_string() }),
        }
    }

    if out.is_empty() {
        json!({ "warning": "Query returned 0 rows", "data": [] })
    } else {
        Value::Array(out)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

fn describe_schema(conn: &Connection) -> Result<String, String> {
    let mut stmt = conn
        .prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .map_err(|e| e.to_string())?;
    let tables: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())))
        .map_err(|e| e.to_string())?
        .collect::<Result<_, _>>()
        .map_err(|e| e.to_string())?;

    let mut out = String::new();
    for (name, ddl) in tables {
        out.push_str(&ddl);
        out.push_str("\n\n/*\n");
        let sample = run_query(
            conn,
            &format!("SELECT * FROM \"{}\" LIMIT {SAMPLE_ROWS}", name.replace('"', "\"\"")),
            SAMPLE_ROWS,
        );
        out.push_str(&format!("{SAMPLE_ROWS} rows from {name} table:\n"));
        out.push_str(&serde_json::to_string_pretty(&sample).unwrap_or_default());
        out.push_str("\n*/\n\n");
    }
    Ok(out.trim_end().to_string())
}

#[async_trait]
impl QueryTool for SqliteQueryTool {
    async fn run(&self, query: &str) -> Result<String, String> {
        let path = self.db_path.clone();
        let sql = query.to_string();
        let max_rows = self.max_rows;
        tracing::info!(sql = %sql, "sql query");

        let started = std::time::Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let conn = Self::connect(&path)?;
            Ok::<_, String>(run_query(&conn, &sql, max_rows))
        })
        .await
        .map_err(|e| e.to_string())??;

        tracing::info!(
            duration_ms = started.elapsed().as_millis() as u64,
            rows = result.as_array().map(|r| r.len()).unwrap_or(0),
            "sql query done"
        );
        serde_json::to_string(&result).map_err(|e| e.to_string())
    }

    async fn schema(&self) -> Result<String, String> {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::connect(&path)?;
            describe_schema(&conn)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE financials (company TEXT, revenue_billion REAL, year INTEGER);
             INSERT INTO financials VALUES ('隆基', 1294.98, 2023);
             INSERT INTO financials VALUES ('通威', 1391.04, 2023);
             INSERT INTO financials VALUES ('晶科', 1186.82, 2023);
             INSERT INTO financials VALUES ('天合', 1133.92, 2023);",
        )
        .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_rows_become_json_objects() {
        let (_dir, path) = seeded_db();
        let tool = SqliteQueryTool::new(&path, 1000);
        let out = tool
            .run("SELECT company, year FROM financials ORDER BY revenue_billion DESC")
            .await
            .unwrap();
        let rows: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(rows[0], json!({"company": "通威", "year": 2023}));
        assert_eq!(rows.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_row_limit_and_empty_result() {
        let (_dir, path) = seeded_db();
        let tool = SqliteQueryTool::new(&path, 2);
        let rows: Value =
            serde_json::from_str(&tool.run("SELECT * FROM financials").await.unwrap()).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);

        let empty: Value = serde_json::from_str(
            &tool
                .run("SELECT * FROM financials WHERE year = 1999")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(empty, json!({"warning": "Query returned 0 rows", "data": []}));
    }

    #[tokio::test]
    async fn test_sql_errors_are_error_objects() {
        let (_dir, path) = seeded_db();
        let tool = SqliteQueryTool::new(&path, 1000);
        let out: Value =
            serde_json::from_str(&tool.run("SELECT * FROM missing_table").await.unwrap()).unwrap();
        assert!(out["error"].as_str().unwrap().contains("missing_table"));

        let ddl: Value =
            serde_json::from_str(&tool.run("CREATE TABLE t (x INTEGER)").await.unwrap()).unwrap();
        assert_eq!(ddl["status"], "success");
    }

    #[tokio::test]
    async fn test_schema_lists_ddl_and_samples() {
        let (_dir, path) = seeded_db();
        let schema = SqliteQueryTool::new(&path, 1000).schema().await.unwrap();
        assert!(schema.contains("CREATE TABLE financials"));
        assert!(schema.contains("3 rows from financials table"));
        assert!(schema.contains("隆基"));
        assert!(!schema.contains("天合"));
    }

    #[tokio::test]
    async fn test_missing_database_is_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SqliteQueryTool::new(dir.path().join("nope.db"), 10);
        assert!(tool.run("SELECT 1").await.is_err());
    }
}
