pub mod common;
pub mod downloader;

pub use downloader::{
    DownloadConfig, DownloadController, DownloadError, DownloadEvent, TaskHandle, TaskSnapshot,
    TaskState,
};
