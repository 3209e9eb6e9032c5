use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::format::select_format;
use super::models::{DownloadOutcome, DownloadRequest, MediaMetadata, ProgressEvent};
use super::{ExtractError, MediaExtractor};

/// 元数据获取超时
const METADATA_TIMEOUT: Duration = Duration::from_secs(180);

/// 进度模板：downloaded|total|total_estimate|speed|eta，字段缺失时为 NA
const PROGRESS_TEMPLATE: &str = "download:%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.eta)s";

/// yt-dlp 子进程封装
pub struct YtDlpExtractor {
    binary: PathBuf,
}

impl YtDlpExtractor {
    /// 探测 yt-dlp 可执行文件
    ///
    /// 优先使用 YTDLP_PATH 环境变量，其次尝试 PATH 中的 yt-dlp。
    pub async fn detect() -> Result<Self, ExtractError> {
        let candidates: Vec<PathBuf> = match std::env::var_os("YTDLP_PATH") {
            Some(path) => vec![PathBuf::from(path)],
            None => vec![PathBuf::from("yt-dlp")],
        };

        for candidate in candidates {
            let probe = Command::new(&candidate)
                .arg("--version")
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output()
                .await;

            if let Ok(output) = probe {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    info!("✅ 检测到 yt-dlp {} ({})", version, candidate.display());
                    return Ok(Self { binary: candidate });
                }
            }
        }

        Err(ExtractError::BinaryNotFound)
    }

    /// 直接使用已知路径（测试用）
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn common_args(&self, request: &DownloadRequest, args: &mut Vec<String>) {
        if let Some(proxy) = &request.proxy {
            if !proxy.is_empty() {
                args.push("--proxy".into());
                args.push(proxy.clone());
            }
        }
        if let Some(user_agent) = &request.user_agent {
            if !user_agent.is_empty() {
                args.push("--user-agent".into());
                args.push(user_agent.clone());
            }
        }
        if let Some(cookies) = &request.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }
        args.push("--socket-timeout".into());
        args.push(request.socket_timeout_secs.to_string());
        args.push("--retries".into());
        args.push(request.retries.to_string());
        if request.allow_playlist {
            args.push("--yes-playlist".into());
        } else {
            args.push("--no-playlist".into());
        }
    }

    fn download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let out = request.output_dir.display().to_string();
        let mut args: Vec<String> = vec!["--newline".into(), "--no-warnings".into()];

        args.push("--progress-template".into());
        args.push(PROGRESS_TEMPLATE.into());

        if request.audio_only {
            // 音频模式：提取为 mp3，不做视频格式选择
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push("mp3".into());
            args.push("--audio-quality".into());
            args.push("0".into());
        } else {
            let format = select_format(
                request.platform,
                &request.quality,
                request.transcoder_available,
                request.format_override.as_deref(),
            );
            debug!("格式选择器: {}", format);
            args.push("-f".into());
            args.push(format);
        }

        // 输出目录结构：<根目录>/<标题>/{video,thumbnails,metadata,subtitles}/
        args.push("-o".into());
        args.push(format!("{}/%(title)s/video/%(title)s.%(ext)s", out));

        if request.download_thumbnail {
            args.push("--write-thumbnail".into());
            args.push("-o".into());
            args.push(format!(
                "thumbnail:{}/%(title)s/thumbnails/%(title)s.%(ext)s",
                out
            ));
        }
        if request.write_metadata {
            args.push("--write-info-json".into());
            args.push("-o".into());
            args.push(format!(
                "infojson:{}/%(title)s/metadata/%(title)s.%(ext)s",
                out
            ));
        }
        if request.download_subtitles {
            args.push("--write-subs".into());
            args.push("--sub-langs".into());
            args.push(request.subtitle_language.clone());
            args.push("-o".into());
            args.push(format!(
                "subtitle:{}/%(title)s/subtitles/%(title)s.%(ext)s",
                out
            ));
        }

        if request.rate_limit > 0 {
            args.push("--limit-rate".into());
            args.push(request.rate_limit.to_string());
        }

        self.common_args(request, &mut args);
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn get_metadata(
        &self,
        url: &str,
        request: &DownloadRequest,
    ) -> Result<MediaMetadata, ExtractError> {
        let mut args: Vec<String> = vec!["--dump-json".into(), "--no-warnings".into()];
        self.common_args(request, &mut args);
        args.push(url.to_string());

        debug!("获取视频信息: {}", url);

        let output = tokio::time::timeout(
            METADATA_TIMEOUT,
            Command::new(&self.binary)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| ExtractError::MetadataTimeout)??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::MetadataFailed(
                stderr.lines().last().unwrap_or("未知错误").to_string(),
            ));
        }

        // 播放列表时每行一个 JSON 对象，取第一个
        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| ExtractError::MetadataFailed("空响应".to_string()))?;

        let metadata: MediaMetadata = serde_json::from_str(first_line)?;
        info!("📹 {}", metadata.title_or_unknown());
        Ok(metadata)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
        token: CancellationToken,
    ) -> Result<DownloadOutcome, ExtractError> {
        let args = self.download_args(request);
        debug!("启动下载: {} {:?}", self.binary.display(), args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // stderr 收集到内存，失败时取末尾作为错误信息
        let stderr_task = tokio::spawn(async move {
            let mut collected = String::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("yt-dlp: {}", line);
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        });

        let mut output_file: Option<PathBuf> = None;

        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("⚠️ 收到取消信号，终止下载进程");
                        let _ = child.kill().await;
                        stderr_task.abort();
                        return Err(ExtractError::Cancelled);
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if let Some(event) = parse_output_line(&line) {
                                    if let ProgressEvent::Destination(path) = &event {
                                        // 合并产物优先于中间文件
                                        if is_media_file(path) || output_file.is_none() {
                                            output_file = Some(path.clone());
                                        }
                                    }
                                    let _ = progress.send(event).await;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!("读取下载输出失败: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = token.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(ExtractError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(ExtractError::DownloadFailed {
                code: status.code(),
                stderr: stderr_text.lines().rev().take(5).collect::<Vec<_>>().join(" | "),
            });
        }

        let _ = progress.send(ProgressEvent::Finished).await;

        // 任务目录为 <根目录>/<标题>，从媒体文件路径回推
        let task_dir = output_file
            .as_ref()
            .and_then(|f| f.parent())
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| request.output_dir.clone());

        Ok(DownloadOutcome {
            output_file,
            task_dir,
        })
    }
}

/// 解析 yt-dlp 的一行输出
///
/// 进度模板行形如 `download:1024|2048|NA|512.0|3`，
/// 目标文件行形如 `[download] Destination: path` 或
/// `[Merger] Merging formats into "path"`。
fn parse_output_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("download:") {
        return parse_progress_fields(rest);
    }
    if let Some(rest) = line.strip_prefix("[download] Destination: ") {
        return Some(ProgressEvent::Destination(PathBuf::from(rest.trim())));
    }
    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into ") {
        let path = rest.trim().trim_matches('"');
        return Some(ProgressEvent::Destination(PathBuf::from(path)));
    }
    if let Some(rest) = line.strip_prefix("[ExtractAudio] Destination: ") {
        return Some(ProgressEvent::Destination(PathBuf::from(rest.trim())));
    }
    None
}

fn parse_progress_fields(fields: &str) -> Option<ProgressEvent> {
    let parts: Vec<&str> = fields.split('|').collect();
    if parts.len() < 5 {
        return None;
    }

    let downloaded = parse_u64(parts[0])?;
    // total 缺失时回退到估算值
    let total = parse_u64(parts[1]).or_else(|| parse_u64(parts[2]));
    let speed = parse_f64(parts[3]);
    let eta = parse_u64(parts[4]);

    Some(ProgressEvent::Downloading {
        downloaded_bytes: downloaded,
        total_bytes: total,
        speed,
        eta_secs: eta,
    })
}

// yt-dlp 的数值字段可能是整数、小数或 NA
fn parse_u64(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "NA" || raw == "None" {
        return None;
    }
    raw.parse::<f64>().ok().map(|v| v.max(0.0) as u64)
}

fn parse_f64(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "NA" || raw == "None" {
        return None;
    }
    raw.parse::<f64>().ok()
}

fn is_media_file(path: &std::path::Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("mp4" | "mkv" | "webm" | "flv" | "mov" | "avi" | "mp3" | "m4a" | "opus")
    )
}

/// 字节数格式化（1536 -> "1.5 KB"）
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
