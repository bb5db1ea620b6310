use clap::Parser;
use resumedl::common::logger::PrettyLogger;
use resumedl::downloader::Command;
use resumedl::{DownloadController, TaskHandle, TaskState, log_info, log_warning};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod cli;
mod reporter;

/// 解析用户输入的交互命令
fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_lowercase().as_str() {
        "p" | "pause" => Some(Command::Pause),
        "r" | "resume" => Some(Command::Resume),
        "c" | "cancel" => Some(Command::Cancel),
        _ => None,
    }
}

/// 从标准输入读取命令并转发给任务；Ctrl-C 视为暂停
async fn dispatch_commands(handle: TaskHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                match parse_command(&line) {
                    Some(command) => {
                        debug!("收到命令: {:?}", command);
                        if handle.send(command).is_err() {
                            break;
                        }
                    }
                    None => PrettyLogger::command_help(),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("收到 Ctrl-C，暂停下载");
                let _ = handle.pause();
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // 初始化日志
    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let controller = DownloadController::new(args.download_config())?;
    let destination = args.destination();

    let (handle, events) = if args.resume {
        let (handle, events) = controller.restore(&destination).await?;
        let snapshot = handle.snapshot();
        log_info!("从 {} 字节处继续下载: {}", snapshot.bytes_transferred, snapshot.url);
        handle.resume()?;
        (handle, events)
    } else {
        let url = args.url.as_deref().unwrap_or_default();
        controller.start(url, &destination).await?
    };

    let snapshot = handle.snapshot();
    PrettyLogger::file_info("保存到", snapshot.destination.display().to_string());
    PrettyLogger::command_help();
    PrettyLogger::separator();

    tokio::spawn(dispatch_commands(handle));

    let last = reporter::ConsoleReporter::default().run(events).await?;
    match last {
        Some(event) if event.state == TaskState::Failed => match event.error {
            Some(e) => Err(e.into()),
            None => Err(anyhow::anyhow!("下载失败")),
        },
        Some(event) if event.state == TaskState::Paused => {
            log_warning!(
                "下载未完成，可使用 --resume -o {} 继续",
                snapshot.destination.display()
            );
            Ok(())
        }
        _ => Ok(()),
    }
}
