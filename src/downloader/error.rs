use thiserror::Error;

use crate::extractor::ExtractError;
use crate::validator::ValidateError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("URL验证失败: {0}")]
    Validate(#[from] ValidateError),
    #[error("提取失败: {0}")]
    Extract(#[from] ExtractError),
    #[error("任务未找到: {0}")]
    TaskNotFound(String),
    #[error("任务已结束，无法取消: {0}")]
    TaskAlreadyFinished(String),
    #[error("下载器已关闭")]
    ManagerClosed,
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("读取批量文件失败 {path}: {source}")]
    BatchFileRead {
        path: String,
        source: std::io::Error,
    },
}
