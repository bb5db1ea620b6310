use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use resumedl::downloader::journal;
use resumedl::downloader::models::DownloadTask;
use resumedl::downloader::{
    DownloadConfig, DownloadController, DownloadError, HttpRangeFetcher, RangeFetcher, RangeStatus,
    TaskState, download_file,
};
use tokio::io::AsyncReadExt;

struct ServerState {
    data: Vec<u8>,
    honor_ranges: bool,
    ranges: Mutex<Vec<Option<String>>>,
}

async fn serve_file(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.ranges.lock().unwrap().push(range.clone());

    let start = range
        .filter(|_| state.honor_ranges)
        .and_then(|r| r.strip_prefix("bytes=")?.strip_suffix('-')?.parse::<usize>().ok());
    let len = state.data.len();
    match start {
        Some(start) if start >= len => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        Some(start) => (
            StatusCode::PARTIAL_CONTENT,
            [(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, len - 1, len))],
            state.data[start..].to_vec(),
        )
            .into_response(),
        None => state.data.clone().into_response(),
    }
}

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    async fn start(data: Vec<u8>, honor_ranges: bool) -> Self {
        let state = Arc::new(ServerState {
            data,
            honor_ranges,
            ranges: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/files/file.bin", get(serve_file))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn ranges(&self) -> Vec<Option<String>> {
        self.state.ranges.lock().unwrap().clone()
    }
}

fn resource(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn fetcher_sends_range_header_and_reads_partial_body() {
    let data = resource(10_000);
    let server = TestServer::start(data.clone(), true).await;
    let fetcher = HttpRangeFetcher::new(&DownloadConfig::default()).unwrap();

    let mut response = fetcher.open(&server.url("/files/file.bin"), 4096).await.unwrap();
    assert_eq!(response.status, RangeStatus::Partial);
    assert_eq!(response.resolve(4096).unwrap(), (4096, Some(10_000)));

    let mut body = Vec::new();
    response.body.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, &data[4096..]);
    assert_eq!(server.ranges(), vec![Some("bytes=4096-".to_string())]);
}

#[tokio::test]
async fn fetcher_without_offset_sends_no_range() {
    let data = resource(1234);
    let server = TestServer::start(data.clone(), true).await;
    let fetcher = HttpRangeFetcher::new(&DownloadConfig::default()).unwrap();

    let mut response = fetcher.open(&server.url("/files/file.bin"), 0).await.unwrap();
    assert_eq!(response.status, RangeStatus::Full);
    assert_eq!(response.content_length, Some(1234));

    let mut body = Vec::new();
    response.body.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, data);
    assert_eq!(server.ranges(), vec![None]);
}

#[tokio::test]
async fn fetcher_treats_ignored_range_as_full_restart() {
    let server = TestServer::start(resource(10_000), false).await;
    let fetcher = HttpRangeFetcher::new(&DownloadConfig::default()).unwrap();

    let response = fetcher.open(&server.url("/files/file.bin"), 4096).await.unwrap();
    assert_eq!(response.status, RangeStatus::Full);
    assert_eq!(response.resolve(4096).unwrap(), (0, Some(10_000)));
}

#[tokio::test]
async fn fetcher_surfaces_http_status() {
    let server = TestServer::start(resource(10), true).await;
    let fetcher = HttpRangeFetcher::new(&DownloadConfig::default()).unwrap();

    let err = fetcher.open(&server.url("/missing"), 0).await.err().unwrap();
    assert_eq!(err, DownloadError::HttpStatus(404));
}

#[tokio::test]
async fn downloads_into_directory_using_url_file_name() {
    let data = resource(10_000);
    let server = TestServer::start(data.clone(), true).await;
    let dir = tempfile::tempdir().unwrap();
    let controller = DownloadController::new(DownloadConfig::default()).unwrap();

    let snapshot = download_file(&controller, &server.url("/files/file.bin"), dir.path())
        .await
        .unwrap();
    assert_eq!(snapshot.state, TaskState::Completed);
    assert_eq!(snapshot.destination, dir.path().join("file.bin"));
    assert_eq!(tokio::fs::read(dir.path().join("file.bin")).await.unwrap(), data);
}

#[tokio::test]
async fn not_found_fails_without_destination_file() {
    let server = TestServer::start(resource(10), true).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");
    let controller = DownloadController::new(DownloadConfig::default()).unwrap();

    let err = download_file(&controller, &server.url("/missing"), &dest)
        .await
        .unwrap_err();
    assert_eq!(err, DownloadError::HttpStatus(404));
    assert!(!dest.exists());
}

#[tokio::test]
async fn connection_refused_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let controller = DownloadController::new(DownloadConfig::default()).unwrap();
    let err = download_file(&controller, &format!("http://{}/file.bin", addr), dir.path().join("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Connection(_)));
}

/// 写入一个部分文件和对应的续传记录，模拟进程被杀后的现场
async fn leave_partial_download(url: &str, dest: &std::path::Path, data: &[u8], offset: usize) {
    tokio::fs::write(dest, &data[..offset]).await.unwrap();
    let mut task = DownloadTask::new(url, dest);
    task.bytes_transferred = offset as u64;
    task.total_bytes = Some(data.len() as u64);
    task.state = TaskState::Paused;
    journal::save(&task).await.unwrap();
}

#[tokio::test]
async fn restored_download_resumes_with_range_request() {
    let data = resource(10_000);
    let server = TestServer::start(data.clone(), true).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file.bin");
    leave_partial_download(&server.url("/files/file.bin"), &dest, &data, 4096).await;

    let controller = DownloadController::new(DownloadConfig::default().with_journal(true)).unwrap();
    let (handle, _events) = controller.restore(&dest).await.unwrap();
    handle.resume().unwrap();

    let done = handle.wait().await;
    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(server.ranges(), vec![Some("bytes=4096-".to_string())]);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    assert!(!journal::journal_path(&dest).exists());
}

#[tokio::test]
async fn restored_download_restarts_when_server_ignores_range() {
    let data = resource(10_000);
    let server = TestServer::start(data.clone(), false).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file.bin");
    leave_partial_download(&server.url("/files/file.bin"), &dest, &data, 4096).await;

    let controller = DownloadController::new(DownloadConfig::default()).unwrap();
    let (handle, _events) = controller.restore(&dest).await.unwrap();
    handle.resume().unwrap();

    assert_eq!(handle.wait().await.state, TaskState::Completed);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
}
