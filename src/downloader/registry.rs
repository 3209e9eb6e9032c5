use std::path::PathBuf;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::task::{DownloadTask, TaskStatus};
use crate::validator::Platform;

/// 各状态任务计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RegistryStats {
    pub fn total(&self) -> usize {
        self.waiting + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn active(&self) -> usize {
        self.waiting + self.running
    }
}

/// 任务注册表
///
/// 所有状态写入都经过 `update`，由它统一执行两条规则：
/// 终态任务拒绝任何修改（取消优先），进度只增不减。
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, DownloadTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建新任务并登记，返回任务快照
    pub fn create(&self, url: String, platform: Platform, output_dir: PathBuf) -> DownloadTask {
        let id = Uuid::new_v4().to_string();
        let task = DownloadTask::new(id.clone(), url, platform, output_dir);
        self.tasks.insert(id, task.clone());
        debug!("登记任务 {} ({})", task.id, task.url);
        task
    }

    pub fn get(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.get(id).map(|t| t.value().clone())
    }

    /// 所有任务快照，按创建时间排序
    pub fn list(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> =
            self.tasks.iter().map(|t| t.value().clone()).collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// 修改任务，返回修改是否生效
    ///
    /// 终态任务直接拒绝；进度回退会被钳制到原值。
    pub fn update(&self, id: &str, f: impl FnOnce(&mut DownloadTask)) -> bool {
        let Some(mut entry) = self.tasks.get_mut(id) else {
            return false;
        };
        if entry.status.is_terminal() {
            return false;
        }

        let prev_progress = entry.progress;
        f(&mut entry);

        if entry.progress < prev_progress {
            entry.progress = prev_progress;
        }
        entry.progress = entry.progress.clamp(0.0, 100.0);
        true
    }

    pub fn remove(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.remove(id).map(|(_, t)| t)
    }

    /// 清理所有终态任务，返回清理数量
    pub fn remove_terminal(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| !t.status.is_terminal());
        before - self.tasks.len()
    }

    pub fn statistics(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for task in self.tasks.iter() {
            match task.status {
                TaskStatus::Waiting => stats.waiting += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
