//! analyst - 终端驱动
//!
//! 入口：初始化日志、按配置装配分析服务，然后在终端里完成「提问 → 审阅计划 → 反馈」循环。
//! `analyst --session <id>` 从检查点恢复已有会话。

use anyhow::Context;
use analyst::{create_service, load_config, AnalysisService, AppConfig, SessionState, TaskStatus};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

type InputLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    analyst::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let service = create_service(&cfg);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let session_id = match args.iter().position(|a| a == "--session") {
        Some(i) => {
            let id = args
                .get(i + 1)
                .context("--session requires a session id")?
                .clone();
            let state = service
                .status(&id)
                .await
                .with_context(|| format!("Failed to load session {id}"))?;
            print_state(&state);
            id
        }
        None => {
            let request = if args.is_empty() {
                prompt(&mut lines, "请输入分析需求> ")
                    .await?
                    .context("No analysis request given")?
            } else {
                args.join(" ")
            };
            let started = service
                .start(&request)
                .await
                .context("Failed to start session")?;
            println!("会话: {}", started.session_id);
            println!("目标: {}", started.understanding.goal);
            let state = service.status(&started.session_id).await?;
            print_state(&state);
            started.session_id
        }
    };

    drive(&service, &session_id, &mut lines).await
}

/// 读取反馈并推进会话，直到完成、失败或输入结束
async fn drive(
    service: &AnalysisService,
    session_id: &str,
    lines: &mut InputLines,
) -> anyhow::Result<()> {
    loop {
        let state = service.status(session_id).await?;
        match TaskStatus::of(&state) {
            TaskStatus::Completed => {
                println!("\n{}", state.report.as_deref().unwrap_or_default());
                return Ok(());
            }
            TaskStatus::Failed => {
                println!("\n分析终止，错误过多：");
                for e in &state.errors {
                    println!("  - {e}");
                }
                return Ok(());
            }
            TaskStatus::AwaitingApproval | TaskStatus::InProgress => {}
        }

        let label = if TaskStatus::of(&state) == TaskStatus::AwaitingApproval {
            "确认执行或提出修改意见> "
        } else {
            "会话未完成，输入任意内容继续> "
        };
        let Some(text) = prompt(lines, label).await? else {
            println!("会话已保存，可用 --session {session_id} 恢复");
            return Ok(());
        };

        let resp = service
            .feedback(session_id, &text)
            .await
            .context("Failed to apply feedback")?;
        if resp.status == TaskStatus::AwaitingApproval {
            let state = service.status(session_id).await?;
            print_state(&state);
        }
    }
}

async fn prompt(lines: &mut InputLines, label: &str) -> anyhow::Result<Option<String>> {
    loop {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(label.as_bytes()).await?;
        stdout.flush().await?;
        match lines.next_line().await? {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(Some(line.trim().to_string())),
            None => return Ok(None),
        }
    }
}

fn print_state(state: &SessionState) {
    println!("\n执行计划（{:?}）：", TaskStatus::of(state));
    for (i, step) in state.plan.iter().enumerate() {
        let marker = if i == state.current_step_index { ">" } else { " " };
        println!(
            "{marker} [{}] {} ({}) {:?}",
            step.id,
            step.task,
            step.tool.name(),
            step.status
        );
    }
    if !state.errors.is_empty() {
        println!("错误 {} 条，最近：{}", state.errors.len(), state.errors.last().map(String::as_str).unwrap_or_default());
    }
}
