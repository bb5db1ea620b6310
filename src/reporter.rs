use indicatif::{ProgressBar, ProgressStyle};
use resumedl::downloader::{EventStream, ProgressEvent, StateEvent};
use resumedl::{DownloadEvent, TaskState, log_error, log_info, log_success, log_warning};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bytes} {msg}";

/// 把下载事件渲染到终端的进度条
#[derive(Default)]
pub struct ConsoleReporter {
    bar: Option<ProgressBar>,
}

impl ConsoleReporter {
    /// 消费事件直到事件流结束，返回最后一次状态事件
    pub async fn run(mut self, mut events: EventStream) -> anyhow::Result<Option<StateEvent>> {
        let mut last_state = None;
        while let Some(event) = events.recv().await {
            match event {
                DownloadEvent::Progress(progress) => self.on_progress(progress)?,
                DownloadEvent::State(state) => {
                    self.on_state(&state);
                    let terminal = state.state.is_terminal();
                    last_state = Some(state);
                    if terminal {
                        break;
                    }
                }
            }
        }
        Ok(last_state)
    }

    fn on_progress(&mut self, progress: ProgressEvent) -> anyhow::Result<()> {
        if self.bar.is_none() {
            let bar = match progress.total_bytes {
                Some(total) => {
                    let bar = ProgressBar::new(total);
                    bar.set_style(ProgressStyle::with_template(BAR_TEMPLATE)?.progress_chars("#>-"));
                    bar
                }
                None => {
                    let bar = ProgressBar::new_spinner();
                    bar.set_style(ProgressStyle::with_template(SPINNER_TEMPLATE)?);
                    bar
                }
            };
            self.bar = Some(bar);
        }
        if let Some(bar) = &self.bar {
            bar.set_position(progress.bytes_transferred);
        }
        Ok(())
    }

    fn on_state(&mut self, event: &StateEvent) {
        let message = match event.state {
            TaskState::Downloading => "正在下载...",
            TaskState::Paused => "已暂停",
            TaskState::Canceling => "正在取消...",
            TaskState::Canceled => "已取消",
            TaskState::Completed => "下载完成",
            TaskState::Failed => "下载失败",
            TaskState::Idle => "",
        };

        match &self.bar {
            Some(bar) if event.state.is_terminal() => bar.finish_with_message(message),
            Some(bar) => bar.set_message(message),
            None => {}
        }

        match event.state {
            TaskState::Paused => log_info!("⏸️ 下载已暂停，输入 r 继续"),
            TaskState::Completed => log_success!("下载完成！"),
            TaskState::Canceled => log_warning!("下载已取消"),
            TaskState::Failed => match &event.error {
                Some(e) => log_error!("下载失败: {}", e),
                None => log_error!("下载失败"),
            },
            _ => {}
        }
        if let Some(warning) = &event.warning {
            log_warning!("{}", warning);
        }
    }
}
