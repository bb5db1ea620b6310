use std::path::Path;

pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod fetcher;
pub mod journal;
pub mod models;
pub mod sink;
pub mod utils;

pub use config::DownloadConfig;
pub use controller::{DownloadController, EventStream, TaskHandle};
pub use error::{DownloadError, Result};
pub use fetcher::{FetchResponse, HttpRangeFetcher, RangeFetcher, RangeStatus};
pub use models::{Command, DownloadEvent, ProgressEvent, StateEvent, TaskSnapshot, TaskState};

/// 下载到结束为止，不需要中途控制时使用
pub async fn download_file(
    controller: &DownloadController,
    url: &str,
    destination: impl AsRef<Path>,
) -> Result<TaskSnapshot> {
    let (handle, _) = controller.start(url, destination).await?;
    let snapshot = handle.wait().await;
    match (&snapshot.state, &snapshot.error) {
        (TaskState::Failed, Some(e)) => Err(e.clone()),
        _ => Ok(snapshot),
    }
}
