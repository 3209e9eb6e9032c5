use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use video_downloader::downloader::{
    run_batch, BatchEntryStatus, DownloadError, DownloadManager, DownloadOptions, TaskStatus,
};
use video_downloader::extractor::{
    DownloadOutcome, DownloadRequest, ExtractError, MediaExtractor, MediaMetadata, ProgressEvent,
};
use video_downloader::post_process::{TranscodeError, Transcoder};
use video_downloader::validator::Platform;

/// 可编排的提取引擎替身
struct MockExtractor {
    delay: Duration,
    fail_urls: HashSet<String>,
    /// 按实际开始顺序记录的URL
    started: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    /// 设置后在此目录下生成模拟输出文件
    output_root: Option<PathBuf>,
    /// 设置后上报该路径但不创建文件
    phantom_output: Option<PathBuf>,
    report_progress: bool,
}

impl MockExtractor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_urls: HashSet::new(),
            started: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            output_root: None,
            phantom_output: None,
            report_progress: false,
        }
    }

    fn started_urls(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaExtractor for MockExtractor {
    async fn get_metadata(
        &self,
        _url: &str,
        _request: &DownloadRequest,
    ) -> Result<MediaMetadata, ExtractError> {
        Ok(MediaMetadata::default())
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
        token: CancellationToken,
    ) -> Result<DownloadOutcome, ExtractError> {
        self.started.lock().unwrap().push(request.url.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let result = async {
            if self.report_progress {
                let _ = progress
                    .send(ProgressEvent::Downloading {
                        downloaded_bytes: 50,
                        total_bytes: Some(200),
                        speed: Some(1024.0),
                        eta_secs: Some(3),
                    })
                    .await;
            }

            tokio::select! {
                _ = token.cancelled() => return Err(ExtractError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }

            if self.fail_urls.contains(&request.url) {
                return Err(ExtractError::DownloadFailed {
                    code: Some(1),
                    stderr: "mock failure".to_string(),
                });
            }

            let output_file = match &self.output_root {
                Some(root) => {
                    let dir = root.join("标题").join("video");
                    std::fs::create_dir_all(&dir).unwrap();
                    let file = dir.join("标题.mp4");
                    std::fs::write(&file, b"av1 bytes").unwrap();
                    let _ = progress.send(ProgressEvent::Destination(file.clone())).await;
                    Some(file)
                }
                None => self.phantom_output.clone(),
            };

            let _ = progress.send(ProgressEvent::Finished).await;
            Ok(DownloadOutcome {
                output_file,
                task_dir: request.output_dir.clone(),
            })
        }
        .await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// 把 AV1 文件替换为固定内容的转码器替身
struct ReplacingTranscoder;

#[async_trait]
impl Transcoder for ReplacingTranscoder {
    async fn probe_codec(&self, _file: &Path) -> Result<String, TranscodeError> {
        Ok("av01".to_string())
    }

    async fn transcode_to_h264(&self, _input: &Path, output: &Path) -> Result<(), TranscodeError> {
        std::fs::write(output, b"h264 bytes").unwrap();
        Ok(())
    }
}

/// 总是失败的转码器替身
struct FailingTranscoder;

#[async_trait]
impl Transcoder for FailingTranscoder {
    async fn probe_codec(&self, _file: &Path) -> Result<String, TranscodeError> {
        Ok("av01".to_string())
    }

    async fn transcode_to_h264(&self, _input: &Path, _output: &Path) -> Result<(), TranscodeError> {
        Err(TranscodeError::TranscodeFailed {
            code: Some(1),
            stderr: "mock transcode failure".to_string(),
        })
    }
}

fn test_options(output_dir: &Path) -> DownloadOptions {
    DownloadOptions {
        output_dir: output_dir.to_path_buf(),
        quality: "best".to_string(),
        audio_only: false,
        format_override: None,
        download_subtitles: false,
        subtitle_language: "zh-CN".to_string(),
        download_thumbnail: false,
        write_metadata: false,
        allow_playlist: false,
        proxy: None,
        user_agent: None,
        cookies_file: None,
        rate_limit: 0,
        retries: 0,
        socket_timeout_secs: 5,
        auto_convert_av1: true,
    }
}

async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_concurrency_limit_respected() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_millis(100)));
    let manager = DownloadManager::new(extractor.clone(), None, 2);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let mut ids = Vec::new();
    for i in 0..5 {
        let url = format!("https://www.youtube.com/watch?v=video{}", i);
        ids.push(manager.enqueue(&url, &options).unwrap());
    }

    for id in &ids {
        let task = manager.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    assert!(extractor.max_active.load(Ordering::SeqCst) <= 2);
    assert_eq!(extractor.started_urls().len(), 5);
}

#[tokio::test]
async fn test_tasks_start_in_submission_order() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_millis(30)));
    let manager = DownloadManager::new(extractor.clone(), None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let urls: Vec<String> = (0..4)
        .map(|i| format!("https://www.youtube.com/watch?v=order{}", i))
        .collect();
    let ids: Vec<String> = urls
        .iter()
        .map(|url| manager.enqueue(url, &options).unwrap())
        .collect();

    for id in &ids {
        manager.wait(id).await.unwrap();
    }

    assert_eq!(extractor.started_urls(), urls);
}

#[tokio::test]
async fn test_cancel_waiting_task_never_runs() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_secs(10)));
    let manager = DownloadManager::new(extractor.clone(), None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let first = manager
        .enqueue("https://www.youtube.com/watch?v=first", &options)
        .unwrap();
    let second = manager
        .enqueue("https://www.youtube.com/watch?v=second", &options)
        .unwrap();

    // 第一个占住唯一名额后，第二个仍在排队
    assert!(
        wait_for(
            || manager.get_task(&first).map(|t| t.status) == Some(TaskStatus::Running),
            Duration::from_secs(2),
        )
        .await
    );
    let snapshot = manager.get_task(&second).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Waiting);
    // 排队中的任务快照就能看到落盘目录
    assert_eq!(snapshot.output_dir, dir.path());

    manager.cancel(&second).unwrap();
    let task = manager.wait(&second).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    // 排队中被取消的任务不应开始下载
    assert_eq!(
        extractor.started_urls(),
        vec!["https://www.youtube.com/watch?v=first".to_string()]
    );

    manager.cancel(&first).unwrap();
    let task = manager.wait(&first).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_running_task() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_secs(10)));
    let manager = DownloadManager::new(extractor.clone(), None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let id = manager
        .enqueue("https://www.youtube.com/watch?v=running", &options)
        .unwrap();

    assert!(
        wait_for(
            || manager.get_task(&id).map(|t| t.status) == Some(TaskStatus::Running),
            Duration::from_secs(2),
        )
        .await
    );

    manager.cancel(&id).unwrap();
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.ended_at.is_some());

    // 终态任务再次取消报错
    assert!(matches!(
        manager.cancel(&id),
        Err(DownloadError::TaskAlreadyFinished(_))
    ));
}

#[tokio::test]
async fn test_progress_maps_bytes_to_percent() {
    let mut extractor = MockExtractor::new(Duration::from_millis(500));
    extractor.report_progress = true;
    let extractor = Arc::new(extractor);
    let manager = DownloadManager::new(extractor, None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let id = manager
        .enqueue("https://www.youtube.com/watch?v=progress", &options)
        .unwrap();

    assert!(
        wait_for(
            || manager.get_task(&id).map(|t| t.progress > 0.0).unwrap_or(false),
            Duration::from_secs(2),
        )
        .await
    );

    let task = manager.get_task(&id).unwrap();
    assert_eq!(task.progress, 25.0);
    assert_eq!(task.downloaded_bytes, 50);
    assert_eq!(task.total_bytes, Some(200));

    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100.0);
}

#[tokio::test]
async fn test_av1_output_converted_after_download() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut extractor = MockExtractor::new(Duration::from_millis(20));
    extractor.output_root = Some(dir.path().to_path_buf());
    let extractor = Arc::new(extractor);
    let manager = DownloadManager::new(extractor, Some(Arc::new(ReplacingTranscoder)), 1);
    let options = test_options(dir.path());

    let id = manager
        .enqueue("https://www.youtube.com/watch?v=av1video", &options)
        .unwrap();
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    let file = task.output_file.unwrap();
    assert_eq!(std::fs::read(&file).unwrap(), b"h264 bytes");
}

#[tokio::test]
async fn test_transcode_failure_does_not_fail_task() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut extractor = MockExtractor::new(Duration::from_millis(20));
    extractor.output_root = Some(dir.path().to_path_buf());
    let extractor = Arc::new(extractor);
    let manager = DownloadManager::new(extractor, Some(Arc::new(FailingTranscoder)), 1);
    let options = test_options(dir.path());

    let id = manager
        .enqueue("https://www.youtube.com/watch?v=badav1", &options)
        .unwrap();
    let task = manager.wait(&id).await.unwrap();

    // 转码失败只保留原文件，任务仍算完成
    assert_eq!(task.status, TaskStatus::Completed);
    let file = task.output_file.unwrap();
    assert_eq!(std::fs::read(&file).unwrap(), b"av1 bytes");
}

#[tokio::test]
async fn test_failed_download_records_error() {
    let mut extractor = MockExtractor::new(Duration::from_millis(20));
    extractor
        .fail_urls
        .insert("https://www.youtube.com/watch?v=broken".to_string());
    let extractor = Arc::new(extractor);
    let manager = DownloadManager::new(extractor, None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let id = manager
        .enqueue("https://www.youtube.com/watch?v=broken", &options)
        .unwrap();
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("mock failure"));
}

#[tokio::test]
async fn test_invalid_url_rejected_at_enqueue() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_millis(20)));
    let manager = DownloadManager::new(extractor.clone(), None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    assert!(matches!(
        manager.enqueue("", &options),
        Err(DownloadError::Validate(_))
    ));
    assert!(matches!(
        manager.enqueue("https://", &options),
        Err(DownloadError::Validate(_))
    ));
    assert!(extractor.started_urls().is_empty());
}

#[tokio::test]
async fn test_unrecognized_platform_still_downloads() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_millis(20)));
    let manager = DownloadManager::new(extractor, None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let id = manager
        .enqueue("https://example.com/some/video", &options)
        .unwrap();
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.platform, Platform::Unknown);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output_dir, dir.path());
}

#[tokio::test]
async fn test_metadata_for_unrecognized_platform() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_millis(20)));
    let manager = DownloadManager::new(extractor, None, 1);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    // 未识别平台的信息查询同样降级为通用提取
    let metadata = manager
        .metadata("https://example.com/some/video", &options)
        .await
        .unwrap();
    assert!(metadata.title.is_none());
}

#[tokio::test]
async fn test_missing_output_file_not_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut extractor = MockExtractor::new(Duration::from_millis(20));
    extractor.phantom_output =
        Some(dir.path().join("标题").join("video").join("不存在.mp4"));
    let extractor = Arc::new(extractor);
    let manager = DownloadManager::new(extractor, None, 1);
    let options = test_options(dir.path());

    let id = manager
        .enqueue("https://www.youtube.com/watch?v=ghost", &options)
        .unwrap();
    let task = manager.wait(&id).await.unwrap();

    // 上报的文件并不存在，完成的任务不保留虚假路径
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.output_file.is_none());
}

#[tokio::test]
async fn test_batch_continues_after_failure() {
    let mut extractor = MockExtractor::new(Duration::from_millis(20));
    extractor
        .fail_urls
        .insert("https://www.youtube.com/watch?v=bad".to_string());
    let extractor = Arc::new(extractor);
    let manager = DownloadManager::new(extractor.clone(), None, 2);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let batch_file = dir.path().join("urls.txt");
    std::fs::write(
        &batch_file,
        "# 测试批量文件\n\
         https://www.youtube.com/watch?v=good1\n\
         \n\
         https://www.youtube.com/watch?v=bad\n\
         https://www.youtube.com/watch?v=good2\n",
    )
    .unwrap();

    let report = run_batch(&manager, &batch_file, &options).await.unwrap();

    assert_eq!(report.total(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(matches!(report.entries[1].status, BatchEntryStatus::Failed(_)));

    // 中间失败不影响后续条目执行
    assert_eq!(extractor.started_urls().len(), 3);
}

#[tokio::test]
async fn test_statistics_and_cleanup() {
    let extractor = Arc::new(MockExtractor::new(Duration::from_millis(20)));
    let manager = DownloadManager::new(extractor, None, 2);
    let dir = tempfile::TempDir::new().unwrap();
    let options = test_options(dir.path());

    let a = manager
        .enqueue("https://www.youtube.com/watch?v=one", &options)
        .unwrap();
    let b = manager
        .enqueue("https://www.youtube.com/watch?v=two", &options)
        .unwrap();

    manager.wait(&a).await.unwrap();
    manager.wait(&b).await.unwrap();

    let stats = manager.statistics();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.active(), 0);

    assert_eq!(manager.clear_finished(), 2);
    assert!(manager.list_tasks().is_empty());
}
