//! 代码分析工具：在 Python 沙箱中执行分析代码，返回捕获的标准输出

use async_trait::async_trait;

use crate::tools::{CodeRun, CodeTool, ExecutionContext, PythonSandbox};

pub struct PythonAnalysisTool {
    sandbox: PythonSandbox,
}

impl PythonAnalysisTool {
    pub fn new(sandbox: PythonSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl CodeTool for PythonAnalysisTool {
    async fn run(&self, code: &str, ctx: &ExecutionContext) -> Result<CodeRun, String> {
        let outcome = self.sandbox.run(code, ctx, None).await?;
        if let Some(error) = outcome.error {
            return Ok(CodeRun::Completed(error.to_string()));
        }
        if outcome.halted() {
            let out = if outcome.stdout.trim().is_empty() {
                "代码执行成功 (SystemExit)".to_string()
            } else {
                outcome.stdout
            };
            return Ok(CodeRun::Halted(out));
        }
        Ok(CodeRun::Completed(if outcome.stdout.is_empty() {
            "代码执行成功（无输出）".to_string()
        } else {
            outcome.stdout
        }))
    }
}
