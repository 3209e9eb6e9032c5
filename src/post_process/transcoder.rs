use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("未找到 ffmpeg/ffprobe")]
    BinaryNotFound,
    #[error("启动转码进程失败: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("检测视频编码失败: {0}")]
    ProbeFailed(String),
    #[error("转码失败 (退出码 {code:?}): {stderr}")]
    TranscodeFailed { code: Option<i32>, stderr: String },
}

/// 视频转码器
///
/// 生产实现包装 ffmpeg/ffprobe，测试用模拟实现替换。
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// 探测视频流的编码名称（如 av01 / h264）
    async fn probe_codec(&self, file: &Path) -> Result<String, TranscodeError>;

    /// 转码为 H.264/AAC，写入 output
    async fn transcode_to_h264(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

/// 基于 ffmpeg 命令行的转码器
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTranscoder {
    /// 探测 ffmpeg 和 ffprobe
    ///
    /// 优先使用 FFMPEG_PATH / FFPROBE_PATH 环境变量，其次尝试 PATH。
    pub async fn detect() -> Result<Self, TranscodeError> {
        let ffmpeg = match std::env::var_os("FFMPEG_PATH") {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("ffmpeg"),
        };
        let ffprobe = match std::env::var_os("FFPROBE_PATH") {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("ffprobe"),
        };

        for binary in [&ffmpeg, &ffprobe] {
            let probe = Command::new(binary)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match probe {
                Ok(status) if status.success() => {}
                _ => return Err(TranscodeError::BinaryNotFound),
            }
        }

        info!("✅ 检测到 ffmpeg ({})", ffmpeg.display());
        Ok(Self { ffmpeg, ffprobe })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe_codec(&self, file: &Path) -> Result<String, TranscodeError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::ProbeFailed(
                stderr.lines().last().unwrap_or("未知错误").to_string(),
            ));
        }

        let codec = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("{} 视频编码: {}", file.display(), codec);
        Ok(codec)
    }

    async fn transcode_to_h264(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        // 参数与桌面播放器兼容性优先：H.264 + AAC + faststart
        let result = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(input)
            .args([
                "-c:v",
                "libx264",
                "-preset",
                "medium",
                "-crf",
                "23",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "+faststart",
                "-y",
            ])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(TranscodeError::TranscodeFailed {
                code: result.status.code(),
                stderr: stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | "),
            });
        }

        Ok(())
    }
}
