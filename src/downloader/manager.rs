use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::registry::{RegistryStats, TaskRegistry};
use super::task::{DownloadTask, TaskStatus};
use crate::config::ConfigManager;
use crate::extractor::{
    DownloadRequest, ExtractError, MediaExtractor, MediaMetadata, ProgressEvent,
};
use crate::post_process::{self, Transcoder};
use crate::validator::{self, Platform, ValidateError};

/// 单个任务的下载选项，未指定时来自配置文件
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    pub quality: String,
    pub audio_only: bool,
    pub format_override: Option<String>,
    pub download_subtitles: bool,
    pub subtitle_language: String,
    pub download_thumbnail: bool,
    pub write_metadata: bool,
    pub allow_playlist: bool,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub rate_limit: u64,
    pub retries: u32,
    pub socket_timeout_secs: u64,
    pub auto_convert_av1: bool,
}

impl DownloadOptions {
    pub fn from_config(config: &ConfigManager) -> Self {
        let proxy = config.get_or("ADVANCED", "proxy", "");
        let user_agent = config.get_or("ADVANCED", "user_agent", "");
        let cookies_file = config.get_or("ADVANCED", "cookies_file", "");
        Self {
            output_dir: config.download_path(),
            quality: config.video_quality(),
            audio_only: false,
            format_override: None,
            download_subtitles: config.get_bool_or("DEFAULT", "enable_subtitles", false),
            subtitle_language: config.get_or("DEFAULT", "subtitle_language", "zh-CN"),
            download_thumbnail: config.get_bool_or("DEFAULT", "enable_thumbnail", true),
            write_metadata: config.get_bool_or("DEFAULT", "enable_metadata", true),
            allow_playlist: false,
            proxy: if proxy.is_empty() { None } else { Some(proxy) },
            user_agent: if user_agent.is_empty() {
                None
            } else {
                Some(user_agent)
            },
            cookies_file: if cookies_file.is_empty() {
                None
            } else {
                Some(PathBuf::from(cookies_file))
            },
            rate_limit: config.get_int_or("ADVANCED", "rate_limit", 0).max(0) as u64,
            retries: config.retry_attempts(),
            socket_timeout_secs: config.timeout_secs(),
            auto_convert_av1: config.get_bool_or("DEFAULT", "auto_convert_av1_to_h264", true),
        }
    }
}

struct QueuedTask {
    task_id: String,
    request: DownloadRequest,
    auto_convert_av1: bool,
}

struct ManagerInner {
    registry: TaskRegistry,
    extractor: Arc<dyn MediaExtractor>,
    transcoder: Option<Arc<dyn Transcoder>>,
    semaphore: Arc<Semaphore>,
    tokens: DashMap<String, CancellationToken>,
}

/// 下载任务管理器
///
/// 入队立即返回任务 ID，调度协程按提交顺序领取任务，
/// 并发数由信号量限制。取消通过 CancellationToken 传递到
/// 正在运行的提取进程。
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
    queue: UnboundedSender<QueuedTask>,
}

impl DownloadManager {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        transcoder: Option<Arc<dyn Transcoder>>,
        max_concurrent: usize,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            registry: TaskRegistry::new(),
            extractor,
            transcoder,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tokens: DashMap::new(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(scheduler(inner.clone(), rx));

        Self { inner, queue: tx }
    }

    /// 验证URL并入队，返回任务 ID
    ///
    /// 未识别的平台不阻止下载：记录警告后按通用平台处理，
    /// 由提取引擎决定成败。
    pub fn enqueue(&self, url: &str, options: &DownloadOptions) -> Result<String, DownloadError> {
        let (normalized, platform) = match validator::validate_and_normalize(url) {
            Ok(result) => result,
            Err(ValidateError::UnsupportedPlatform(supported)) => {
                warn!("⚠️ 未识别的平台，尝试通用下载 (已识别: {})", supported);
                (validator::normalize_url(url), Platform::Unknown)
            }
            Err(e) => return Err(e.into()),
        };

        let task = self
            .inner
            .registry
            .create(normalized.clone(), platform, options.output_dir.clone());
        let token = CancellationToken::new();
        self.inner.tokens.insert(task.id.clone(), token);

        let request = DownloadRequest {
            url: normalized,
            platform,
            output_dir: options.output_dir.clone(),
            quality: options.quality.clone(),
            audio_only: options.audio_only,
            format_override: options.format_override.clone(),
            download_subtitles: options.download_subtitles,
            subtitle_language: options.subtitle_language.clone(),
            download_thumbnail: options.download_thumbnail,
            write_metadata: options.write_metadata,
            allow_playlist: options.allow_playlist,
            proxy: options.proxy.clone(),
            user_agent: options.user_agent.clone(),
            cookies_file: options.cookies_file.clone(),
            rate_limit: options.rate_limit,
            retries: options.retries,
            socket_timeout_secs: options.socket_timeout_secs,
            transcoder_available: self.inner.transcoder.is_some(),
        };

        self.queue
            .send(QueuedTask {
                task_id: task.id.clone(),
                request,
                auto_convert_av1: options.auto_convert_av1,
            })
            .map_err(|_| DownloadError::ManagerClosed)?;

        info!("任务已入队: {} ({})", task.id, platform);
        Ok(task.id)
    }

    /// 取消任务
    ///
    /// 等待中的任务直接进入已取消；运行中的任务终止其提取进程。
    /// 已结束的任务返回错误。
    pub fn cancel(&self, task_id: &str) -> Result<(), DownloadError> {
        let updated = self.inner.registry.update(task_id, |t| {
            t.status = TaskStatus::Cancelled;
            t.ended_at = Some(chrono::Local::now());
        });

        if !updated {
            return match self.inner.registry.get(task_id) {
                Some(_) => Err(DownloadError::TaskAlreadyFinished(task_id.to_string())),
                None => Err(DownloadError::TaskNotFound(task_id.to_string())),
            };
        }

        if let Some(token) = self.inner.tokens.get(task_id) {
            token.cancel();
        }
        info!("任务已取消: {}", task_id);
        Ok(())
    }

    /// 仅获取视频信息，不下载
    pub async fn metadata(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<MediaMetadata, DownloadError> {
        let (normalized, platform) = match validator::validate_and_normalize(url) {
            Ok(result) => result,
            Err(ValidateError::UnsupportedPlatform(supported)) => {
                warn!("⚠️ 未识别的平台，尝试通用提取 (已识别: {})", supported);
                (validator::normalize_url(url), Platform::Unknown)
            }
            Err(e) => return Err(e.into()),
        };

        let request = DownloadRequest {
            url: normalized.clone(),
            platform,
            output_dir: options.output_dir.clone(),
            quality: options.quality.clone(),
            audio_only: options.audio_only,
            format_override: options.format_override.clone(),
            download_subtitles: false,
            subtitle_language: options.subtitle_language.clone(),
            download_thumbnail: false,
            write_metadata: false,
            allow_playlist: options.allow_playlist,
            proxy: options.proxy.clone(),
            user_agent: options.user_agent.clone(),
            cookies_file: options.cookies_file.clone(),
            rate_limit: 0,
            retries: options.retries,
            socket_timeout_secs: options.socket_timeout_secs,
            transcoder_available: self.inner.transcoder.is_some(),
        };

        Ok(self.inner.extractor.get_metadata(&normalized, &request).await?)
    }

    pub fn get_task(&self, task_id: &str) -> Option<DownloadTask> {
        self.inner.registry.get(task_id)
    }

    pub fn list_tasks(&self) -> Vec<DownloadTask> {
        self.inner.registry.list()
    }

    pub fn statistics(&self) -> RegistryStats {
        self.inner.registry.statistics()
    }

    /// 清理终态任务记录
    pub fn clear_finished(&self) -> usize {
        let removed = self.inner.registry.remove_terminal();
        self.inner
            .tokens
            .retain(|id, _| self.inner.registry.get(id).is_some());
        removed
    }

    /// 轮询等待任务进入终态
    pub async fn wait(&self, task_id: &str) -> Result<DownloadTask, DownloadError> {
        loop {
            let task = self
                .inner
                .registry
                .get(task_id)
                .ok_or_else(|| DownloadError::TaskNotFound(task_id.to_string()))?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// 调度协程：按入队顺序领取任务，受信号量约束
async fn scheduler(inner: Arc<ManagerInner>, mut rx: UnboundedReceiver<QueuedTask>) {
    while let Some(queued) = rx.recv().await {
        let token = match inner.tokens.get(&queued.task_id) {
            Some(token) => token.clone(),
            None => continue,
        };

        // 排队期间已取消的任务不占用名额
        if token.is_cancelled() {
            continue;
        }

        let permit = tokio::select! {
            _ = token.cancelled() => continue,
            permit = inner.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::spawn(run_worker(inner.clone(), queued, token, permit));
    }
    debug!("调度协程退出");
}

async fn run_worker(
    inner: Arc<ManagerInner>,
    queued: QueuedTask,
    token: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    let task_id = queued.task_id;

    // 取消竞争：终态任务这里写不进去，直接放弃
    let started = inner.registry.update(&task_id, |t| {
        t.status = TaskStatus::Running;
        t.started_at = Some(chrono::Local::now());
    });
    if !started {
        return;
    }

    info!("▶️ 开始下载: {} ({})", task_id, queued.request.url);

    // 标题先从元数据取，失败不影响下载本身
    match inner
        .extractor
        .get_metadata(&queued.request.url, &queued.request)
        .await
    {
        Ok(metadata) => {
            let title = metadata.title.clone();
            inner.registry.update(&task_id, |t| t.title = title.clone());
        }
        Err(e) => warn!("获取视频信息失败，继续下载: {}", e),
    }

    let (tx, rx) = mpsc::channel(64);
    let progress_task = tokio::spawn(consume_progress(inner.clone(), task_id.clone(), rx));

    let result = inner
        .extractor
        .download(&queued.request, tx, token.clone())
        .await;

    // 通道发送端随 download 返回关闭，等消费端排空
    let _ = progress_task.await;

    match result {
        Ok(outcome) => {
            let output_file = confirm_output(outcome.output_file, &outcome.task_dir).await;

            if queued.auto_convert_av1 && !queued.request.audio_only {
                if let (Some(transcoder), Some(file)) = (&inner.transcoder, &output_file) {
                    post_process::convert_av1_if_needed(transcoder.as_ref(), file).await;
                }
            }

            let completed = inner.registry.update(&task_id, |t| {
                t.status = TaskStatus::Completed;
                t.progress = 100.0;
                t.output_file = output_file.clone();
                t.ended_at = Some(chrono::Local::now());
            });
            if completed {
                info!("✅ 下载完成: {}", task_id);
            }
        }
        Err(ExtractError::Cancelled) => {
            // 正常路径下 cancel() 已写入终态，这里兜底
            inner.registry.update(&task_id, |t| {
                t.status = TaskStatus::Cancelled;
                t.ended_at = Some(chrono::Local::now());
            });
            info!("⏹️ 下载已取消: {}", task_id);
        }
        Err(e) => {
            error!("❌ 下载失败 {}: {}", task_id, e);
            inner.registry.update(&task_id, |t| {
                t.status = TaskStatus::Failed;
                t.error = Some(e.to_string());
                t.ended_at = Some(chrono::Local::now());
            });
        }
    }
}

/// 消费进度事件写入注册表
async fn consume_progress(
    inner: Arc<ManagerInner>,
    task_id: String,
    mut rx: mpsc::Receiver<ProgressEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Downloading {
                downloaded_bytes,
                total_bytes,
                speed,
                eta_secs,
            } => {
                inner.registry.update(&task_id, |t| {
                    t.downloaded_bytes = downloaded_bytes;
                    if total_bytes.is_some() {
                        t.total_bytes = total_bytes;
                    }
                    t.speed = speed;
                    t.eta_secs = eta_secs;
                    if let Some(total) = total_bytes {
                        if total > 0 {
                            t.progress = downloaded_bytes as f64 / total as f64 * 100.0;
                        }
                    }
                });
            }
            ProgressEvent::Destination(path) => {
                let title = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_string());
                inner.registry.update(&task_id, |t| {
                    if t.title.is_none() {
                        t.title = title.clone();
                    }
                    t.output_file = Some(path.clone());
                });
            }
            ProgressEvent::Finished => {}
        }
    }
}

/// 确认输出文件存在，必要时在任务目录中查找
///
/// 提取引擎输出的路径偶尔与最终文件不一致（合并、改扩展名），
/// 找不到时退回到 video 子目录里最新的文件；
/// 仍找不到则返回 None，不保留指向不存在文件的路径。
async fn confirm_output(reported: Option<PathBuf>, task_dir: &std::path::Path) -> Option<PathBuf> {
    if let Some(path) = &reported {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return reported;
        }
    }

    let video_dir = task_dir.join("video");
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    if let Ok(mut entries) = tokio::fs::read_dir(&video_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
    }

    newest.map(|(_, path)| path)
}
