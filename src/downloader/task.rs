use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::validator::Platform;

/// 任务状态机
///
/// Waiting -> Running -> Completed/Failed，
/// Waiting/Running 均可进入 Cancelled。终态不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "等待中",
            TaskStatus::Running => "下载中",
            TaskStatus::Completed => "已完成",
            TaskStatus::Failed => "失败",
            TaskStatus::Cancelled => "已取消",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 一次下载任务的完整记录
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub url: String,
    pub platform: Platform,
    /// 任务落盘的根目录，创建后不再变化
    pub output_dir: PathBuf,
    pub status: TaskStatus,
    /// 0.0 ~ 100.0，单调不减
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// 下载速度（字节/秒）
    pub speed: Option<f64>,
    pub eta_secs: Option<u64>,
    pub title: Option<String>,
    pub output_file: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Local>,
    pub started_at: Option<DateTime<Local>>,
    pub ended_at: Option<DateTime<Local>>,
}

impl DownloadTask {
    pub fn new(id: String, url: String, platform: Platform, output_dir: PathBuf) -> Self {
        Self {
            id,
            url,
            platform,
            output_dir,
            status: TaskStatus::Waiting,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: None,
            speed: None,
            eta_secs: None,
            title: None,
            output_file: None,
            error: None,
            created_at: Local::now(),
            started_at: None,
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_task_starts_waiting() {
        let task = DownloadTask::new(
            "abc".to_string(),
            "https://example.com".to_string(),
            Platform::Unknown,
            PathBuf::from("downloads"),
        );
        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.progress, 0.0);
        assert_eq!(task.output_dir, PathBuf::from("downloads"));
        assert!(task.started_at.is_none());
    }
}
