//! 绘图工具：在 Python 沙箱中执行 matplotlib 代码并保存为图片
//!
//! 模型给出的绘图代码常带 plt.show() / plt.savefig(...)，执行前替换掉，由沙箱统一保存；
//! 文件名只取纯文件名，落在 images_dir 下，防止写到任意路径。

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::parser::extract_code;
use crate::tools::{ChartTool, ExecutionContext, PythonSandbox};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg", "pdf"];

static SHOW_OR_SAVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"plt\.(show|savefig)\([^()]*(\([^()]*\)[^()]*)*\)").expect("static regex")
});

pub struct PythonChartTool {
    sandbox: PythonSandbox,
    images_dir: PathBuf,
}

impl PythonChartTool {
    pub fn new(sandbox: PythonSandbox, images_dir: impl AsRef<Path>) -> Self {
        Self {
            sandbox,
            images_dir: images_dir.as_ref().to_path_buf(),
        }
    }
}

/// 纯文件名 + 图片扩展名；其他字符替换为下划线
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let mut name: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name = name.trim_start_matches('.').to_string();
    if name.is_empty() {
        return "plot.png".to_string();
    }
    let has_image_ext = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false);
    if !has_image_ext {
        name.push_str(".png");
    }
    name
}

/// 去掉代码围栏，并把 plt.show() / plt.savefig(...) 替换为 pass
pub fn clean_plot_code(plot_code: &str) -> String {
    let code = extract_code(plot_code, "python");
    SHOW_OR_SAVE.replace_all(&code, "pass").into_owned()
}

#[async_trait]
impl ChartTool for PythonChartTool {
    async fn run(
        &self,
        plot_code: &str,
        filename: &str,
        ctx: &ExecutionContext,
    ) -> Result<String, String> {
        let code = clean_plot_code(plot_code);
        if code.trim().is_empty() {
            return Ok(json!({ "error": "绘图失败: 绘图代码为空" }).to_string());
        }

        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|e| format!("无法创建图片目录 {}: {e}", self.images_dir.display()))?;
        let path = self.images_dir.join(sanitize_filename(filename));
        // 同名旧图会让「文件是否生成」的判断失真
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&path).await;
        }

        let outcome = self.sandbox.run(&code, ctx, Some(&path)).await?;
        if let Some(error) = outcome.error {
            return Ok(error.to_string());
        }
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(json!({
                "error": "绘图失败: 文件未生成",
                "output": outcome.stdout,
            })
            .to_string());
        }
        tracing::info!(path = %path.display(), "chart saved");
        Ok(json!({
            "status": "success",
            "path": path.to_string_lossy(),
            "output": outcome.stdout,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_is_forced_into_images_dir() {
        assert_eq!(sanitize_filename("../../etc/revenue.png"), "revenue.png");
        assert_eq!(sanitize_filename("C:\\tmp\\trend"), "trend.png");
        assert_eq!(sanitize_filename("营收 对比.svg"), "营收_对比.svg");
        assert_eq!(sanitize_filename(""), "plot.png");
        assert_eq!(sanitize_filename("..."), "plot.png");
        assert_eq!(sanitize_filename("chart.txt"), "chart.txt.png");
    }

    #[test]
    fn test_show_and_savefig_are_neutralized() {
        let code = "```python\nplt.bar(x, y)\nplt.savefig(os.path.join('a', 'b.png'), dpi=100)\nplt.show()\n```";
        let cleaned = clean_plot_code(code);
        assert_eq!(cleaned, "plt.bar(x, y)\npass\npass");
    }

    #[tokio::test]
    async fn test_empty_plot_code_is_error_object() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PythonChartTool::new(PythonSandbox::new("python3"), dir.path());
        let out = tool
            .run("   ", "plot.png", &ExecutionContext::default())
            .await
            .unwrap();
        assert!(out.contains("绘图代码为空"));
    }
}
