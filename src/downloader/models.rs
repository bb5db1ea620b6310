use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::DownloadError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Downloading,
    Paused,
    Canceling,
    Canceled,
    Completed,
    Failed,
}

impl TaskState {
    /// Completed / Canceled / Failed 之后不会再有任何状态变化
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Canceled | TaskState::Completed | TaskState::Failed
        )
    }
}

/// 单个下载任务
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub destination: PathBuf,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub state: TaskState,
    pub last_error: Option<DownloadError>,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            bytes_transferred: 0,
            total_bytes: None,
            state: TaskState::Idle,
            last_error: None,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        percent_of(self.bytes_transferred, self.total_bytes)
    }

    pub fn progress(&self) -> ProgressEvent {
        ProgressEvent {
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
            percent: self.percent(),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            url: self.url.clone(),
            destination: self.destination.clone(),
            state: self.state,
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
            error: self.last_error.clone(),
        }
    }
}

/// floor(bytes * 100 / total)，总长度未知或为 0 时返回 None
pub fn percent_of(bytes: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => {
            let pct = (bytes as u128 * 100) / total as u128;
            Some(pct.min(100) as u8)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub state: TaskState,
    pub error: Option<DownloadError>,
    // 取消时删除文件失败
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Progress(ProgressEvent),
    State(StateEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub url: String,
    pub destination: PathBuf,
    pub state: TaskState,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub error: Option<DownloadError>,
}

/// 外部下发给运行中任务的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Cancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_floors_and_caps() {
        assert_eq!(percent_of(4096, Some(10_000)), Some(40));
        assert_eq!(percent_of(8192, Some(10_000)), Some(81));
        assert_eq!(percent_of(10_000, Some(10_000)), Some(100));
        assert_eq!(percent_of(12_000, Some(10_000)), Some(100));
    }

    #[test]
    fn percent_unknown_without_total() {
        assert_eq!(percent_of(100, None), None);
        assert_eq!(percent_of(100, Some(0)), None);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
        assert!(!TaskState::Canceling.is_terminal());
    }
}
