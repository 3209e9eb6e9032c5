use std::path::Path;

use tracing::{info, warn};

use super::error::DownloadError;
use super::manager::{DownloadManager, DownloadOptions};
use super::task::TaskStatus;

/// 批量下载中单个条目的结果
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub line_no: usize,
    pub url: String,
    pub task_id: Option<String>,
    pub status: BatchEntryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntryStatus {
    Completed,
    Failed(String),
    Cancelled,
}

/// 批量下载汇总
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == BatchEntryStatus::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }
}

/// 逐行处理批量文件，空行和 # 注释跳过
///
/// 条目之间串行执行，单个条目失败不影响后续条目。
pub async fn run_batch(
    manager: &DownloadManager,
    batch_file: &Path,
    options: &DownloadOptions,
) -> Result<BatchReport, DownloadError> {
    let content = tokio::fs::read_to_string(batch_file)
        .await
        .map_err(|e| DownloadError::BatchFileRead {
            path: batch_file.display().to_string(),
            source: e,
        })?;

    let urls: Vec<(usize, String)> = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(no, line)| (no, line.to_string()))
        .collect();

    info!("📋 批量下载: {} 个链接", urls.len());

    let mut report = BatchReport::default();

    for (idx, (line_no, url)) in urls.iter().enumerate() {
        info!("[{}/{}] {}", idx + 1, urls.len(), url);

        let entry = match manager.enqueue(url, options) {
            Ok(task_id) => {
                let task = manager.wait(&task_id).await?;
                let status = match task.status {
                    TaskStatus::Completed => BatchEntryStatus::Completed,
                    TaskStatus::Cancelled => BatchEntryStatus::Cancelled,
                    _ => BatchEntryStatus::Failed(
                        task.error.unwrap_or_else(|| "未知错误".to_string()),
                    ),
                };
                BatchEntry {
                    line_no: *line_no,
                    url: url.clone(),
                    task_id: Some(task_id),
                    status,
                }
            }
            Err(e) => {
                warn!("❌ 第 {} 行入队失败: {}", line_no, e);
                BatchEntry {
                    line_no: *line_no,
                    url: url.clone(),
                    task_id: None,
                    status: BatchEntryStatus::Failed(e.to_string()),
                }
            }
        };

        report.entries.push(entry);
    }

    info!(
        "📋 批量下载结束: 成功 {} / 失败 {}",
        report.succeeded(),
        report.failed()
    );
    Ok(report)
}
