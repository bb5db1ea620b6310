use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_USER_AGENT: &str = concat!("resumedl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 每次读写的块大小（字节）
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    /// 单个块读取的超时时间，超时后任务进入 Failed
    pub read_timeout: Duration,
    pub user_agent: String,
    /// 是否在每次状态变化时写入续传记录
    pub journal: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            journal: false,
        }
    }
}

impl DownloadConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_journal(mut self, journal: bool) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}
