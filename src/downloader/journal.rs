use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{DownloadError, Result};
use super::models::{DownloadTask, TaskState};

const JOURNAL_SUFFIX: &str = ".resume.json";

/// 持久化的续传记录，进程重启后仍可恢复下载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub url: String,
    pub destination: PathBuf,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub state: TaskState,
}

impl From<&DownloadTask> for JournalEntry {
    fn from(task: &DownloadTask) -> Self {
        Self {
            url: task.url.clone(),
            destination: task.destination.clone(),
            bytes_transferred: task.bytes_transferred,
            total_bytes: task.total_bytes,
            state: task.state,
        }
    }
}

pub fn journal_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(JOURNAL_SUFFIX);
    PathBuf::from(name)
}

/// 写入续传记录。先写临时文件再重命名，避免留下半截 JSON
pub async fn save(task: &DownloadTask) -> Result<()> {
    let path = journal_path(&task.destination);
    let data = serde_json::to_vec_pretty(&JournalEntry::from(task))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| DownloadError::Journal(format!("写入 {:?} 失败: {}", tmp, e)))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| DownloadError::Journal(format!("重命名 {:?} 失败: {}", path, e)))?;

    debug!("续传记录已保存: {:?} ({:?})", path, task.state);
    Ok(())
}

pub async fn load(destination: &Path) -> Result<JournalEntry> {
    let path = journal_path(destination);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|e| DownloadError::Journal(format!("读取 {:?} 失败: {}", path, e)))?;
    Ok(serde_json::from_slice(&data)?)
}

pub async fn remove(destination: &Path) {
    let path = journal_path(destination);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!("续传记录已删除: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除续传记录失败 {:?}: {}", path, e),
    }
}
