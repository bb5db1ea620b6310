use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use resumedl::DownloadConfig;

/// 断点续传下载器
#[derive(Parser, Debug)]
#[command(name = "resumedl")]
#[command(version)]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "一个支持暂停、恢复与取消的断点续传下载工具", long_about = None)]
pub struct Cli {
    /// 下载链接 (http/https)
    #[arg(long, value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    #[arg(required_unless_present = "resume")]
    pub url: Option<String>,

    /// 保存目录
    #[arg(long, value_name = "DIR")]
    #[arg(default_value = ".")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// 保存的文件名 (默认取 URL 的最后一段)
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// 从续传记录恢复之前中断的下载
    #[arg(long, requires = "output")]
    pub resume: bool,

    #[arg(long, value_name = "BYTES", default_value_t = 4096)]
    #[arg(help = "每次读写的块大小")]
    pub chunk_size: usize,

    #[arg(long, value_name = "SECS", default_value_t = 15)]
    #[arg(help = "连接超时（秒）")]
    pub connect_timeout: u64,

    #[arg(long, value_name = "SECS", default_value_t = 30)]
    #[arg(help = "读取超时（秒），超时后下载失败")]
    pub read_timeout: u64,

    /// 不写入续传记录
    #[arg(long)]
    pub no_journal: bool,

    /// 输出调试日志
    #[arg(long, short)]
    pub verbose: bool,
}

impl Cli {
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            ..DownloadConfig::default()
        }
        .with_chunk_size(self.chunk_size)
        .with_journal(!self.no_journal)
    }

    /// 目标路径：指定了文件名时拼接到保存目录，否则交给下载器按 URL 命名
    pub fn destination(&self) -> PathBuf {
        match &self.output {
            Some(file) => self.output_dir.join(file),
            None => self.output_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_download_config() {
        let cli = Cli::parse_from(["resumedl", "--url", "http://example.com/a.bin"]);
        let config = cli.download_config();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert!(config.journal);
        assert_eq!(cli.destination(), PathBuf::from("."));
    }

    #[test]
    fn output_is_joined_to_dir() {
        let cli = Cli::parse_from([
            "resumedl", "--url", "http://example.com/a.bin", "--output-dir", "/tmp/dl", "-o", "b.bin",
        ]);
        assert_eq!(cli.destination(), PathBuf::from("/tmp/dl/b.bin"));
    }

    #[test]
    fn resume_requires_output() {
        assert!(Cli::try_parse_from(["resumedl", "--resume"]).is_err());
        assert!(Cli::try_parse_from(["resumedl", "--resume", "-o", "a.bin"]).is_ok());
    }

    #[test]
    fn url_required_without_resume() {
        assert!(Cli::try_parse_from(["resumedl"]).is_err());
    }
}
