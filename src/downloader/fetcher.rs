use std::io;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{
    Client, ClientBuilder, StatusCode,
    header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderValue, RANGE, USER_AGENT},
};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::config::DownloadConfig;
use super::error::{DownloadError, Result};

pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// 服务器对请求的响应方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    /// 200，返回完整内容（服务器忽略了 Range）
    Full,
    /// 206，从请求的偏移开始返回
    Partial,
}

pub struct FetchResponse {
    pub status: RangeStatus,
    pub content_length: Option<u64>,
    /// Content-Range 中声明的 (起始位置, 总长度)
    pub content_range: Option<(u64, Option<u64>)>,
    pub body: BodyReader,
}

impl FetchResponse {
    pub fn new(status: RangeStatus, content_length: Option<u64>, body: BodyReader) -> Self {
        Self {
            status,
            content_length,
            content_range: None,
            body,
        }
    }

    /// 根据请求偏移计算实际起始偏移与总长度
    ///
    /// 200 意味着服务器从头发送，之前的部分文件作废；206 时总长度为
    /// `offset + Content-Length`。
    pub fn resolve(&self, requested_offset: u64) -> Result<(u64, Option<u64>)> {
        match self.status {
            RangeStatus::Full => Ok((0, self.content_length)),
            RangeStatus::Partial => {
                if let Some((start, _)) = self.content_range {
                    if start != requested_offset {
                        return Err(DownloadError::Connection(format!(
                            "Content-Range 起始位置 {} 与请求偏移 {} 不一致",
                            start, requested_offset
                        )));
                    }
                }
                let total = match self.content_length {
                    Some(len) => Some(requested_offset + len),
                    None => self.content_range.and_then(|(_, total)| total),
                };
                Ok((requested_offset, total))
            }
        }
    }
}

#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// 打开到 `url` 的连接，`offset > 0` 时携带 `Range: bytes=offset-`
    async fn open(&self, url: &str, offset: u64) -> Result<FetchResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    inner: Client,
}

impl HttpRangeFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let inner = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .default_headers(Self::get_default_headers(&config.user_agent))
            .build()
            .map_err(|e| DownloadError::Connection(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { inner })
    }

    pub fn get_default_headers(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        // 偏移按原始字节计算，不能让服务器压缩
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn open(&self, url: &str, offset: u64) -> Result<FetchResponse> {
        let mut request = self.inner.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        debug!("GET {} (offset {})", url, offset);

        let response = request.send().await?;
        let status = match response.status() {
            StatusCode::OK => RangeStatus::Full,
            StatusCode::PARTIAL_CONTENT => RangeStatus::Partial,
            other => {
                warn!("非成功状态码: {}", other);
                return Err(DownloadError::HttpStatus(other.as_u16()));
            }
        };

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        debug!(
            "Response Status: {}, Content-Length: {:?}, Content-Range: {:?}",
            response.status(),
            content_length,
            content_range
        );

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(FetchResponse {
            status,
            content_length,
            content_range,
            body: Box::new(StreamReader::new(stream)),
        })
    }
}

/// 解析 `bytes start-end/total`，total 为 `*` 时视为未知
pub fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, total))
}
