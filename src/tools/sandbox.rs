//! Python 沙箱：每次调用启动一个独立解释器进程
//!
//! 代码与上下文通过 stdin 以 JSON 信封 {mode, code, context, save_path} 传入，
//! 用户代码中 `context` 变量即本次调用的规范化上下文。进程之间不共享任何作用域。
//! 结果以最后一行 JSON {status, stdout, error} 写回：
//! - status = "halted" 表示代码调用了 sys.exit / exit / quit
//! - error 为 {"error","type","traceback"} 对象

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::tools::ExecutionContext;

const RUNNER: &str = r##"
import sys, io, json, contextlib, traceback

envelope = json.loads(sys.stdin.read())
scope = {"__name__": "__analysis__", "context": envelope.get("context") or {}, "json": json, "io": io, "sys": sys}
for alias, module in (("pd", "pandas"), ("np", "numpy")):
    try:
        scope[alias] = __import__(module)
    except Exception:
        pass

save_path = envelope.get("save_path")
if save_path:
    try:
        import matplotlib
        matplotlib.use("Agg")
        import matplotlib.pyplot as plt
        plt.rcParams["font.sans-serif"] = ["WenQuanYi Micro Hei", "SimHei", "Arial Unicode MS", "PingFang HK", "DejaVu Sans"]
        plt.rcParams["axes.unicode_minus"] = False
        scope["plt"] = plt
        try:
            import seaborn as sns
            scope["sns"] = sns
        except Exception:
            pass
    except Exception as exc:
        sys.__stdout__.write("\n" + json.dumps({"status": "completed", "stdout": "", "error": {"error": "matplotlib unavailable: %s" % exc, "type": type(exc).__name__, "traceback": ""}}, ensure_ascii=False) + "\n")
        sys.exit(0)

buf = io.StringIO()
status = "completed"
error = None
try:
    with contextlib.redirect_stdout(buf):
        exec(compile(envelope["code"], "<analysis>", "exec"), scope, scope)
except SystemExit:
    status = "halted"
except BaseException as exc:
    error = {"error": str(exc), "type": type(exc).__name__, "traceback": traceback.format_exc()}

if save_path and error is None:
    try:
        with contextlib.redirect_stdout(buf):
            scope["plt"].savefig(save_path, bbox_inches="tight")
            scope["plt"].close("all")
    except BaseException as exc:
        error = {"error": str(exc), "type": type(exc).__name__, "traceback": traceback.format_exc()}

sys.__stdout__.write("\n" + json.dumps({"status": status, "stdout": buf.getvalue(), "error": error}, ensure_ascii=False, default=str) + "\n")
"##;

/// 沙箱返回的结构化结果
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxOutcome {
    #[serde(default)]
    status: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub error: Option<Value>,
}

impl SandboxOutcome {
    pub fn halted(&self) -> bool {
        self.status == "halted"
    }
}

/// Python 子进程沙箱
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    python: String,
}

impl PythonSandbox {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// 执行代码；save_path 不为空时在代码结束后保存当前图像
    pub async fn run(
        &self,
        code: &str,
        ctx: &ExecutionContext,
        save_path: Option<&Path>,
    ) -> Result<SandboxOutcome, String> {
        let envelope = json!({
            "mode": if save_path.is_some() { "chart" } else { "analysis" },
            "code": code,
            "context": ctx.context,
            "save_path": save_path.map(|p| p.to_string_lossy().into_owned()),
        });
        let payload = serde_json::to_vec(&envelope).map_err(|e| e.to_string())?;

        tracing::debug!(code = %code, "python sandbox run");
        let mut child = Command::new(&self.python)
            .arg("-c")
            .arg(RUNNER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.python))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| format!("failed to send code to sandbox: {e}"))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("sandbox wait failed: {e}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| serde_json::from_str::<SandboxOutcome>(l).ok())
            .ok_or_else(|| {
                let stderr = String::from_utf8_lossy(&output.stderr);
                format!(
                    "sandbox exited with {} without a result: {}",
                    output.status,
                    stderr.trim()
                )
            })
    }
}
