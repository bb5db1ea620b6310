use std::path::{Path, PathBuf};

use url::Url;

use super::error::{DownloadError, Result};

pub const FALLBACK_FILE_NAME: &str = "downloaded_file.bin";

/// 校验下载链接，只接受带主机名的 http/https 地址
pub fn validate_url(url: &str) -> Result<Url> {
    let url = url.trim();
    if url.is_empty() {
        return Err(DownloadError::InvalidInput("URL 不能为空".to_string()));
    }

    let parsed = Url::parse(url)
        .map_err(|e| DownloadError::InvalidInput(format!("无效的URL {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DownloadError::InvalidInput(format!("不支持的协议: {}", other)));
        }
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(DownloadError::InvalidInput(format!("URL 缺少主机名: {}", url)));
    }
    Ok(parsed)
}

/// URL 路径的最后一段，没有时使用默认文件名
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// 目标是已存在的目录时，在其中按 URL 生成文件名
pub async fn resolve_destination(url: &Url, destination: &Path) -> Result<PathBuf> {
    if destination.as_os_str().is_empty() {
        return Err(DownloadError::InvalidInput("目标路径不能为空".to_string()));
    }

    let is_dir = tokio::fs::metadata(destination)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if is_dir {
        Ok(destination.join(file_name_from_url(url)))
    } else {
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_urls() {
        for bad in ["", "   ", "not a url", "ftp://example.com/file", "file:///etc/passwd"] {
            assert!(
                matches!(validate_url(bad), Err(DownloadError::InvalidInput(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_url("http://example.com/a.bin").is_ok());
        assert!(validate_url(" https://example.com/a.bin ").is_ok());
    }

    #[test]
    fn file_name_comes_from_last_segment() {
        let url = Url::parse("https://example.com/files/archive.zip?x=1").unwrap();
        assert_eq!(file_name_from_url(&url), "archive.zip");

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(file_name_from_url(&url), FALLBACK_FILE_NAME);
    }

    #[tokio::test]
    async fn directory_destination_gets_url_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse("http://example.com/data/report.pdf").unwrap();

        let resolved = resolve_destination(&url, dir.path()).await.unwrap();
        assert_eq!(resolved, dir.path().join("report.pdf"));

        let explicit = dir.path().join("custom.pdf");
        assert_eq!(resolve_destination(&url, &explicit).await.unwrap(), explicit);
    }

    #[tokio::test]
    async fn empty_destination_is_invalid() {
        let url = Url::parse("http://example.com/a").unwrap();
        assert!(matches!(
            resolve_destination(&url, Path::new("")).await,
            Err(DownloadError::InvalidInput(_))
        ));
    }
}
