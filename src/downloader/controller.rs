use std::path::Path;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use super::config::DownloadConfig;
use super::core::Worker;
use super::error::{DownloadError, Result};
use super::fetcher::{HttpRangeFetcher, RangeFetcher};
use super::journal;
use super::models::{Command, DownloadEvent, DownloadTask, TaskSnapshot, TaskState};
use super::utils::{resolve_destination, validate_url};

pub type EventStream = mpsc::UnboundedReceiver<DownloadEvent>;

/// 同一时间只运行一个下载任务的控制器
pub struct DownloadController {
    fetcher: Arc<dyn RangeFetcher>,
    config: Arc<DownloadConfig>,
    active: Mutex<Option<watch::Receiver<TaskSnapshot>>>,
}

impl DownloadController {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let fetcher = HttpRangeFetcher::new(&config)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    pub fn with_fetcher(config: DownloadConfig, fetcher: Arc<dyn RangeFetcher>) -> Self {
        Self {
            fetcher,
            config: Arc::new(config),
            active: Mutex::new(None),
        }
    }

    /// 开始一个新的下载任务
    ///
    /// URL 无效时立即返回 `InvalidInput`，不做任何 I/O；已有未结束的任务时返回
    /// `TaskActive`。进度与状态通过返回的事件流获得。
    pub async fn start(
        &self,
        url: &str,
        destination: impl AsRef<Path>,
    ) -> Result<(TaskHandle, EventStream)> {
        let parsed = validate_url(url)?;
        let destination = resolve_destination(&parsed, destination.as_ref()).await?;
        let task = DownloadTask::new(parsed.as_str(), destination);
        self.spawn(task, TaskState::Downloading).await
    }

    /// 根据续传记录恢复一个任务，恢复后处于 Paused 状态，调用 `resume` 继续
    pub async fn restore(&self, destination: impl AsRef<Path>) -> Result<(TaskHandle, EventStream)> {
        let entry = journal::load(destination.as_ref()).await?;
        let parsed = validate_url(&entry.url)?;

        // 磁盘上已写入的字节都是有效前缀，以文件实际长度为准
        let on_disk = match tokio::fs::metadata(&entry.destination).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(DownloadError::storage(&entry.destination, e)),
        };
        if on_disk != entry.bytes_transferred {
            warn!(
                "续传记录偏移 {} 与文件长度 {} 不一致，以文件长度为准",
                entry.bytes_transferred, on_disk
            );
        }
        if let Some(total) = entry.total_bytes {
            if on_disk > total {
                return Err(DownloadError::Journal(format!(
                    "文件长度 {} 超过远程文件大小 {}",
                    on_disk, total
                )));
            }
        }

        let mut task = DownloadTask::new(parsed.as_str(), entry.destination);
        task.bytes_transferred = on_disk;
        task.total_bytes = entry.total_bytes;
        info!("从续传记录恢复任务: {} (偏移 {})", task.url, on_disk);
        self.spawn(task, TaskState::Paused).await
    }

    /// 当前（或最近一次）任务的状态
    pub async fn active(&self) -> Option<TaskSnapshot> {
        let active = self.active.lock().await;
        active.as_ref().map(|rx| rx.borrow().clone())
    }

    async fn spawn(
        &self,
        task: DownloadTask,
        initial: TaskState,
    ) -> Result<(TaskHandle, EventStream)> {
        let mut active = self.active.lock().await;
        if let Some(rx) = active.as_ref() {
            // 工作协程已退出（has_changed 报错）时视为空闲
            let finished = rx.borrow().state.is_terminal();
            let worker_alive = rx.has_changed().is_ok();
            if !finished && worker_alive {
                return Err(DownloadError::TaskActive);
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(task.snapshot());
        *active = Some(snapshot_rx.clone());

        debug!("创建下载任务: {} -> {:?}", task.url, task.destination);
        let worker = Worker::new(
            task,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.config),
            command_rx,
            event_tx,
            snapshot_tx,
        );
        tokio::spawn(worker.run(initial));

        Ok((
            TaskHandle {
                commands: command_tx,
                snapshot: snapshot_rx,
            },
            event_rx,
        ))
    }
}

/// 指向单个任务的句柄，可在任意协程/线程中下发命令
#[derive(Debug, Clone)]
pub struct TaskHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<TaskSnapshot>,
}

impl TaskHandle {
    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn cancel(&self) -> Result<()> {
        self.send(Command::Cancel)
    }

    pub fn send(&self, command: Command) -> Result<()> {
        if self.snapshot.borrow().state.is_terminal() {
            return Err(DownloadError::TaskFinished);
        }
        self.commands
            .send(command)
            .map_err(|_| DownloadError::TaskFinished)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot.borrow().clone()
    }

    /// 等待任务进入终态
    pub async fn wait(&self) -> TaskSnapshot {
        let mut rx = self.snapshot.clone();
        loop {
            if rx.borrow_and_update().state.is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        rx.borrow().clone()
    }

    /// 等待任务进入指定状态（或终态）
    pub async fn wait_for(&self, state: TaskState) -> TaskSnapshot {
        let mut rx = self.snapshot.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if current.state == state || current.state.is_terminal() {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}
