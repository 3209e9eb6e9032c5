use std::path::PathBuf;

use serde::Deserialize;

use crate::validator::Platform;

/// 单个可用格式（来自元数据 JSON 的 formats 数组）
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub format_note: Option<String>,
}

/// 视频元数据（`--dump-json` 的关键字段）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
}

impl MediaMetadata {
    pub fn title_or_unknown(&self) -> &str {
        self.title.as_deref().unwrap_or("未知标题")
    }

    /// 时长格式化为 HH:MM:SS / MM:SS
    pub fn duration_display(&self) -> String {
        match self.duration {
            Some(secs) if secs > 0.0 => {
                let total = secs as u64;
                let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
                if h > 0 {
                    format!("{:02}:{:02}:{:02}", h, m, s)
                } else {
                    format!("{:02}:{:02}", m, s)
                }
            }
            _ => "未知".to_string(),
        }
    }
}

/// 交给提取引擎的下载请求
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub platform: Platform,
    /// 输出根目录（各任务在其下建立 <标题>/video 等子目录）
    pub output_dir: PathBuf,
    /// 质量档位：best / 1080p / 720p / 480p / 360p
    pub quality: String,
    /// 仅下载音频（提取为 mp3）
    pub audio_only: bool,
    /// 显式格式选择器，优先于质量档位
    pub format_override: Option<String>,
    pub download_subtitles: bool,
    pub subtitle_language: String,
    pub download_thumbnail: bool,
    pub write_metadata: bool,
    pub allow_playlist: bool,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub cookies_file: Option<PathBuf>,
    /// 限速（字节/秒），0 表示不限速
    pub rate_limit: u64,
    pub retries: u32,
    pub socket_timeout_secs: u64,
    /// 转码器是否可用，影响格式偏好（不可用时避开 AV1）
    pub transcoder_available: bool,
}

/// 下载过程中提取引擎上报的进度事件
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Downloading {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        speed: Option<f64>,
        eta_secs: Option<u64>,
    },
    /// 某个输出文件确定了目标路径
    Destination(PathBuf),
    Finished,
}

/// 下载完成后的结果
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// 主媒体文件路径（提取引擎能确定时）
    pub output_file: Option<PathBuf>,
    /// 本次任务的输出目录 <output_dir>/<标题>
    pub task_dir: PathBuf,
}
