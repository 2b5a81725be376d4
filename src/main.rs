//! Orbit 交互入口
//!
//! 初始化日志与 Supervisor，然后逐行读取标准输入：内置命令直接处理，其余行作为任务描述执行。

use std::path::PathBuf;

use anyhow::Context;
use orbit::config::load_config;
use orbit::observability;
use orbit::{ProcessResponse, Supervisor};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const HELP: &str = "\
Commands:
  help           show this message
  status         supervisor status and quota usage
  agents         registered stages
  health         health check
  cleanup        apply the retention policy to the output directory
  key <sk-...>   save a local OpenAI key
  remember <key> <value>   store a value for this session (JSON or plain text)
  recall <key>   show a stored value
  memories       list stored keys
  forget [key]   drop one key, or everything
  quit | exit | q
Anything else is processed as a task description.";

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}

fn summarize(response: &ProcessResponse) -> String {
    match response {
        ProcessResponse::Completed {
            success,
            processing_time,
            result,
            ..
        } => {
            let mut lines = vec![format!(
                "success={} in {:.2}s -> {}",
                success,
                processing_time,
                result.artifact_path.display()
            )];
            for name in &result.stage_order {
                if let Some(stage) = result.stages.get(name) {
                    lines.push(format!("  {:<10} {}", name, stage.status()));
                }
            }
            if let Some(packaging) = &result.packaging {
                lines.push(format!("  packaging  {}: {}", packaging.status, packaging.message));
            }
            lines.join("\n")
        }
        ProcessResponse::Rejected { error, detail, .. } => format!("{error}: {detail}"),
    }
}

async fn remember(supervisor: &Supervisor, args: &str) -> String {
    let Some((key, raw)) = args.trim().split_once(char::is_whitespace) else {
        return "usage: remember <key> <value>".to_string();
    };
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::from(raw));
    match supervisor.memory().save(key, value).await {
        Some(meta) => format!("Saved {} to '{}'.", meta.kind, meta.key),
        None => "usage: remember <key> <value>".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(cfg.app.verbose);

    println!("{}", observability::banner());
    for warning in observability::startup_warnings(&cfg) {
        tracing::warn!("{}", warning);
    }

    let supervisor = Supervisor::from_config(&cfg).context("Failed to build supervisor")?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"orbit> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let output = match line {
            "quit" | "exit" | "q" => break,
            "help" => HELP.to_string(),
            "status" => pretty(&supervisor.status().await),
            "agents" => pretty(&supervisor.agent_info(None)),
            "health" => pretty(&supervisor.health_check().await),
            "cleanup" => match supervisor.cleanup().await {
                Ok(report) => pretty(&report),
                Err(e) => format!("cleanup failed: {e}"),
            },
            _ if line.starts_with("key ") => match supervisor.set_local_key(&line[4..]) {
                Ok(()) => "Local key saved.".to_string(),
                Err(e) => e.to_string(),
            },
            "memories" => pretty(&supervisor.memory().list().await),
            "forget" => format!("Cleared {} memories.", supervisor.memory().clear(None).await),
            _ if line.starts_with("forget ") => {
                match supervisor.memory().clear(Some(&line[7..])).await {
                    0 => format!("No memory found for '{}'.", line[7..].trim()),
                    _ => format!("Forgot '{}'.", line[7..].trim()),
                }
            }
            _ if line.starts_with("recall ") => match supervisor.memory().recall(&line[7..]).await {
                Some((value, _)) => pretty(&value),
                None => format!("No memory found for '{}'.", line[7..].trim()),
            },
            _ if line.starts_with("remember ") => remember(&supervisor, &line[9..]).await,
            task => summarize(&supervisor.process_request(task).await),
        };
        println!("{output}");
    }

    Ok(())
}
