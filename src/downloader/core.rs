use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::config::DownloadConfig;
use super::error::DownloadError;
use super::fetcher::RangeFetcher;
use super::journal;
use super::models::{Command, DownloadEvent, DownloadTask, StateEvent, TaskSnapshot, TaskState};
use super::sink::{FileSink, remove_output};

/// 打断传输循环的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Pause,
    Cancel,
}

enum TransferOutcome {
    Completed,
    Interrupted(Interrupt),
    Failed(DownloadError),
}

impl From<Interrupt> for TransferOutcome {
    fn from(interrupt: Interrupt) -> Self {
        TransferOutcome::Interrupted(interrupt)
    }
}

/// 命令队列的接收端，只在检查点被读取
struct Inbox {
    rx: mpsc::UnboundedReceiver<Command>,
    open: bool,
}

impl Inbox {
    fn new(rx: mpsc::UnboundedReceiver<Command>) -> Self {
        Self { rx, open: true }
    }

    /// 按到达顺序取出所有待处理命令并折算结果：Cancel 一旦出现即生效，
    /// Pause 之后的 Resume 抵消该 Pause，单独的 Resume 被忽略
    fn drain(&mut self) -> Option<Interrupt> {
        self.drain_from(None)
    }

    fn drain_from(&mut self, mut pending: Option<Interrupt>) -> Option<Interrupt> {
        while self.open {
            match self.rx.try_recv() {
                Ok(Command::Cancel) => pending = Some(Interrupt::Cancel),
                Ok(Command::Pause) => {
                    pending.get_or_insert(Interrupt::Pause);
                }
                Ok(Command::Resume) => match pending {
                    Some(Interrupt::Pause) => {
                        debug!("Resume 抵消了尚未生效的 Pause");
                        pending = None;
                    }
                    Some(Interrupt::Cancel) => {}
                    None => debug!("下载进行中，忽略 Resume 命令"),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.open = false,
            }
        }
        pending
    }

    /// 等待下一个 Pause 或 Cancel。所有句柄都已释放时永远不会返回
    async fn next_interrupt(&mut self) -> Interrupt {
        while self.open {
            match self.rx.recv().await {
                Some(Command::Cancel) => return Interrupt::Cancel,
                Some(Command::Pause) => {
                    if let Some(interrupt) = self.drain_from(Some(Interrupt::Pause)) {
                        return interrupt;
                    }
                }
                Some(Command::Resume) => debug!("下载进行中，忽略 Resume 命令"),
                None => self.open = false,
            }
        }
        std::future::pending().await
    }

    /// 运行 `fut`，期间收到 Pause/Cancel 则放弃它
    async fn race<F: Future>(&mut self, fut: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            interrupt = self.next_interrupt() => Err(interrupt),
            output = fut => Ok(output),
        }
    }

    /// 暂停状态下等待命令；返回 None 表示再也不会有命令
    async fn recv(&mut self) -> Option<Command> {
        if !self.open {
            return None;
        }
        let command = self.rx.recv().await;
        if command.is_none() {
            self.open = false;
        }
        command
    }
}

/// 读满一个块或读到流结束
///
/// `read_timeout` 作用于每一次底层读取。已读到部分数据后发生超时，先返回这部分数据，
/// 超时错误留给下一次调用
async fn read_chunk<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    read_timeout: Duration,
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = match tokio::time::timeout(read_timeout, reader.read(&mut buf[filled..])).await {
            Ok(read) => read?,
            Err(_) if filled > 0 => break,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("读取数据超时 ({:?})", read_timeout),
                ));
            }
        };
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// 单个任务的工作协程，独占任务状态
pub(crate) struct Worker {
    task: DownloadTask,
    fetcher: Arc<dyn RangeFetcher>,
    config: Arc<DownloadConfig>,
    inbox: Inbox,
    events: mpsc::UnboundedSender<DownloadEvent>,
    snapshot: watch::Sender<TaskSnapshot>,
}

impl Worker {
    pub(crate) fn new(
        task: DownloadTask,
        fetcher: Arc<dyn RangeFetcher>,
        config: Arc<DownloadConfig>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<DownloadEvent>,
        snapshot: watch::Sender<TaskSnapshot>,
    ) -> Self {
        Self {
            task,
            fetcher,
            config,
            inbox: Inbox::new(commands),
            events,
            snapshot,
        }
    }

    /// 驱动状态机直到终态；`initial` 为 Downloading（新任务）或 Paused（恢复的任务）
    pub(crate) async fn run(mut self, initial: TaskState) {
        info!("开始下载任务: {} -> {:?}", self.task.url, self.task.destination);
        self.transition(initial, None).await;

        loop {
            match self.task.state {
                TaskState::Downloading => match self.transfer().await {
                    TransferOutcome::Completed => {
                        info!("✅ 下载完成: {:?} ({} 字节)", self.task.destination, self.task.bytes_transferred);
                        self.transition(TaskState::Completed, None).await;
                    }
                    TransferOutcome::Interrupted(Interrupt::Pause) => {
                        info!("⏸️ 下载已暂停，偏移: {}", self.task.bytes_transferred);
                        self.transition(TaskState::Paused, None).await;
                    }
                    TransferOutcome::Interrupted(Interrupt::Cancel) => self.cancel().await,
                    TransferOutcome::Failed(e) => self.fail(e).await,
                },
                TaskState::Paused => match self.inbox.recv().await {
                    Some(Command::Resume) => {
                        info!("▶️ 继续下载，偏移: {}", self.task.bytes_transferred);
                        self.transition(TaskState::Downloading, None).await;
                    }
                    Some(Command::Cancel) => self.cancel().await,
                    Some(Command::Pause) => debug!("任务已处于暂停状态，忽略 Pause 命令"),
                    None => {
                        info!("所有任务句柄已释放，保留暂停状态: {:?}", self.task.destination);
                        break;
                    }
                },
                state => {
                    debug!("任务结束: {:?}", state);
                    break;
                }
            }
        }
    }

    async fn transfer(&mut self) -> TransferOutcome {
        if let Some(interrupt) = self.inbox.drain() {
            return interrupt.into();
        }

        let requested = self.task.bytes_transferred;
        if requested > 0 && self.task.total_bytes == Some(requested) {
            // 最后一个块写完后才暂停，文件已完整
            debug!("文件已完整 ({} 字节)，无需再次请求", requested);
            return TransferOutcome::Completed;
        }
        let fetcher = Arc::clone(&self.fetcher);
        let url = self.task.url.clone();
        let response_timeout = self.config.connect_timeout + self.config.read_timeout;
        let response = match self
            .inbox
            .race(tokio::time::timeout(response_timeout, fetcher.open(&url, requested)))
            .await
        {
            Err(interrupt) => return interrupt.into(),
            Ok(Err(_)) => {
                return TransferOutcome::Failed(DownloadError::Connection(format!(
                    "等待响应超时 ({:?})",
                    response_timeout
                )));
            }
            Ok(Ok(Err(e))) => return TransferOutcome::Failed(e),
            Ok(Ok(Ok(response))) => response,
        };

        let (start, total) = match response.resolve(requested) {
            Ok(resolved) => resolved,
            Err(e) => return TransferOutcome::Failed(e),
        };
        match (self.task.total_bytes, total) {
            (Some(known), Some(reported)) if known != reported => {
                return TransferOutcome::Failed(DownloadError::Connection(format!(
                    "远程文件大小发生变化: {} -> {}",
                    known, reported
                )));
            }
            (None, Some(reported)) => self.task.total_bytes = Some(reported),
            _ => {}
        }

        let mut sink = match FileSink::open(&self.task.destination, start > 0, start).await {
            Ok(sink) => sink,
            Err(e) => return TransferOutcome::Failed(e),
        };
        if start < requested {
            warn!("服务器不支持断点续传，从头开始下载 (丢弃 {} 字节)", requested);
            self.task.bytes_transferred = start;
        }
        let mut body = response.body;

        let outcome = self.pump(&mut *body, &mut sink).await;

        // 先释放网络流，再关闭文件
        drop(body);
        let closed = sink.finish().await;
        match (outcome, closed) {
            (TransferOutcome::Interrupted(Interrupt::Cancel), _) => {
                TransferOutcome::Interrupted(Interrupt::Cancel)
            }
            (TransferOutcome::Failed(e), Err(close_err)) => {
                warn!("关闭输出文件失败: {}", close_err);
                TransferOutcome::Failed(e)
            }
            (_, Err(close_err)) => TransferOutcome::Failed(close_err),
            (outcome, Ok(())) => outcome,
        }
    }

    /// 核心循环：检查命令 -> 读一个块 -> 写入 -> 汇报进度
    async fn pump<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        body: &mut R,
        sink: &mut FileSink,
    ) -> TransferOutcome {
        let read_timeout: Duration = self.config.read_timeout;
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];

        loop {
            if let Some(interrupt) = self.inbox.drain() {
                return interrupt.into();
            }

            let read = self
                .inbox
                .race(read_chunk(&mut *body, &mut buf, read_timeout))
                .await;
            let n = match read {
                Err(interrupt) => return interrupt.into(),
                Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                    return TransferOutcome::Failed(DownloadError::Connection(e.to_string()));
                }
                Ok(Err(e)) => {
                    return TransferOutcome::Failed(DownloadError::Connection(format!(
                        "读取数据失败: {}",
                        e
                    )));
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
            };

            if let Err(e) = sink.write(&buf[..n]).await {
                return TransferOutcome::Failed(e);
            }
            self.task.bytes_transferred += n as u64;
            self.emit_progress();
        }

        match self.task.total_bytes {
            Some(total) if total != self.task.bytes_transferred => {
                TransferOutcome::Failed(DownloadError::Connection(format!(
                    "连接提前结束: 已接收 {} / {} 字节",
                    self.task.bytes_transferred, total
                )))
            }
            _ => TransferOutcome::Completed,
        }
    }

    async fn cancel(&mut self) {
        self.transition(TaskState::Canceling, None).await;

        let warning = match remove_output(&self.task.destination).await {
            Ok(()) => None,
            Err(e) => {
                warn!("删除未完成的文件失败 {:?}: {}", self.task.destination, e);
                Some(format!("删除文件失败: {}", e))
            }
        };
        info!("❌ 下载已取消: {}", self.task.url);
        self.transition(TaskState::Canceled, warning).await;
    }

    async fn fail(&mut self, e: DownloadError) {
        error!("❌ 下载任务失败: {}, 错误: {}", self.task.url, e);
        self.task.last_error = Some(e);
        self.transition(TaskState::Failed, None).await;
    }

    fn emit_progress(&self) {
        let progress = self.task.progress();
        debug!(
            "进度: {} / {:?} ({:?}%)",
            progress.bytes_transferred, progress.total_bytes, progress.percent
        );
        // 接收端被丢弃时不影响下载
        let _ = self.events.send(DownloadEvent::Progress(progress));
        self.snapshot.send_replace(self.task.snapshot());
    }

    async fn transition(&mut self, state: TaskState, warning: Option<String>) {
        debug!("状态变化: {:?} -> {:?}", self.task.state, state);
        self.task.state = state;

        if self.config.journal {
            match state {
                TaskState::Completed | TaskState::Canceled => {
                    journal::remove(&self.task.destination).await
                }
                TaskState::Canceling => {}
                _ => {
                    if let Err(e) = journal::save(&self.task).await {
                        warn!("保存续传记录失败: {}", e);
                    }
                }
            }
        }

        let event = StateEvent {
            state,
            error: match state {
                TaskState::Failed => self.task.last_error.clone(),
                _ => None,
            },
            warning,
        };
        let _ = self.events.send(DownloadEvent::State(event));
        self.snapshot.send_replace(self.task.snapshot());
    }
}
