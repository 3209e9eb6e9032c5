pub mod transcoder;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub use transcoder::{FfmpegTranscoder, TranscodeError, Transcoder};

use crate::extractor::ytdlp::format_bytes;

/// 下载完成后检查视频编码，AV1 自动转为 H.264
///
/// 整个过程尽力而为：探测或转码失败只记录警告，
/// 原始文件保持可用，任务不因此失败。
/// 返回替换是否发生。
pub async fn convert_av1_if_needed(transcoder: &dyn Transcoder, file: &Path) -> bool {
    let codec = match transcoder.probe_codec(file).await {
        Ok(codec) => codec,
        Err(e) => {
            warn!("⚠️ 编码检测失败，跳过转换: {}", e);
            return false;
        }
    };

    if !codec.eq_ignore_ascii_case("av01") && !codec.to_ascii_lowercase().starts_with("av1") {
        return false;
    }

    info!("检测到 AV1 编码，开始转换为 H.264: {}", file.display());
    let temp = transcode_target(file);

    if let Err(e) = transcoder.transcode_to_h264(file, &temp).await {
        warn!("❌ H.264 转换失败: {}", e);
        let _ = tokio::fs::remove_file(&temp).await;
        return false;
    }

    // 转码产物必须实际存在才替换原文件
    let temp_size = match tokio::fs::metadata(&temp).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        _ => {
            warn!("❌ 转换产物缺失或为空，保留原文件");
            let _ = tokio::fs::remove_file(&temp).await;
            return false;
        }
    };

    let original_size = tokio::fs::metadata(file).await.map(|m| m.len()).unwrap_or(0);

    // 单次 rename 覆盖原文件，避免先删后改留下中间态
    if let Err(e) = tokio::fs::rename(&temp, file).await {
        warn!("❌ 替换原文件失败: {}", e);
        let _ = tokio::fs::remove_file(&temp).await;
        return false;
    }

    info!(
        "✅ H.264 转换完成: {} ({} -> {})",
        file.display(),
        format_bytes(original_size),
        format_bytes(temp_size)
    );
    true
}

fn transcode_target(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("converted");
    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    file.with_file_name(format!("{}_h264.{}", stem, ext))
}
