use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::{DownloadError, Result};

/// 绑定到目标路径的输出文件
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileSink {
    /// `append = false` 时创建或截断文件；`append = true` 时在文件末尾继续写，
    /// 且当前长度必须等于 `expected_offset`
    pub async fn open(path: &Path, append: bool, expected_offset: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::storage(parent, e))?;
        }

        let file = if append {
            OpenOptions::new()
                .append(true)
                .open(path)
                .await
                .map_err(|e| DownloadError::storage(path, e))?
        } else {
            File::create(path)
                .await
                .map_err(|e| DownloadError::storage(path, e))?
        };

        let len = file
            .metadata()
            .await
            .map_err(|e| DownloadError::storage(path, e))?
            .len();
        if append && len != expected_offset {
            return Err(DownloadError::storage(
                path,
                format!("文件长度 {} 与续传偏移 {} 不一致", len, expected_offset),
            ));
        }

        debug!("打开输出文件: {:?} (append: {}, len: {})", path, append, len);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// 写入一个块，返回时数据已交给操作系统
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .await
            .map_err(|e| DownloadError::storage(&self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| DownloadError::storage(&self.path, e))?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// 刷新并同步到磁盘后关闭
    pub async fn finish(mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| DownloadError::storage(&self.path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| DownloadError::storage(&self.path, e))?;
        debug!("输出文件已关闭: {:?} ({} 字节)", self.path, self.len);
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }
}

/// 删除目标文件，文件不存在时视为成功
pub async fn remove_output(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
