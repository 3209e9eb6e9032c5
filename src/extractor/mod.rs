pub mod format;
pub mod models;
pub mod ytdlp;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use models::{DownloadOutcome, DownloadRequest, MediaFormat, MediaMetadata, ProgressEvent};
pub use ytdlp::YtDlpExtractor;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("未找到 yt-dlp，请先安装: pip install yt-dlp")]
    BinaryNotFound,
    #[error("启动提取进程失败: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("获取视频信息失败: {0}")]
    MetadataFailed(String),
    #[error("解析视频信息失败: {0}")]
    MetadataParse(#[from] serde_json::Error),
    #[error("获取视频信息超时")]
    MetadataTimeout,
    #[error("下载失败 (退出码 {code:?}): {stderr}")]
    DownloadFailed { code: Option<i32>, stderr: String },
    #[error("下载已取消")]
    Cancelled,
}

/// 媒体提取引擎
///
/// 生产实现包装 yt-dlp 子进程，测试用模拟实现替换。
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// 获取视频元数据，不下载
    async fn get_metadata(&self, url: &str, request: &DownloadRequest)
        -> Result<MediaMetadata, ExtractError>;

    /// 执行下载，通过 progress 通道上报进度，token 取消时终止子进程
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
        token: CancellationToken,
    ) -> Result<DownloadOutcome, ExtractError>;
}
