use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("无效的输入: {0}")]
    InvalidInput(String),

    #[error("连接失败: {0}")]
    Connection(String),

    #[error("HTTP 请求失败，状态码: {0}")]
    HttpStatus(u16),

    #[error("存储错误 ({path}): {message}")]
    Storage { path: PathBuf, message: String },

    #[error("已有下载任务正在进行")]
    TaskActive,

    #[error("下载任务已结束")]
    TaskFinished,

    #[error("续传记录错误: {0}")]
    Journal(String),
}

impl DownloadError {
    pub fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        DownloadError::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return DownloadError::HttpStatus(status.as_u16());
        }
        if error.is_timeout() {
            return DownloadError::Connection(format!("请求超时: {}", error));
        }
        DownloadError::Connection(error.to_string())
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(error: serde_json::Error) -> Self {
        DownloadError::Journal(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
