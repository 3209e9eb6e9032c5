use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use video_downloader::cli::Cli;
use video_downloader::config::ConfigManager;
use video_downloader::downloader::{
    self, BatchEntryStatus, DownloadManager, DownloadOptions, TaskStatus,
};
use video_downloader::extractor::ytdlp::format_bytes;
use video_downloader::extractor::YtDlpExtractor;
use video_downloader::post_process::{FfmpegTranscoder, Transcoder};
use video_downloader::validator;
use video_downloader::Result;

#[tokio::main]
async fn main() -> ExitCode {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Cli::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    if args.list_platforms {
        println!("已识别的平台:");
        for platform in validator::supported_platforms() {
            println!("  - {}", platform.display_name());
        }
        println!("其它平台按通用方式尝试下载");
        return Ok(());
    }

    if args.url.is_none() && args.batch_file.is_none() {
        return Err("请提供视频链接或 --batch-file (--help 查看用法)".into());
    }

    let config = ConfigManager::load(&args.config);
    let options = build_options(&args, &config);

    // 外部工具探测
    let extractor = Arc::new(YtDlpExtractor::detect().await?);

    let transcoder: Option<Arc<dyn Transcoder>> = match FfmpegTranscoder::detect().await {
        Ok(t) => Some(Arc::new(t)),
        Err(_) => {
            warn!("⚠️ 未找到 ffmpeg，进入兼容模式：格式选择避开 AV1，不做转码");
            None
        }
    };

    let concurrency = args
        .concurrency
        .unwrap_or_else(|| config.max_concurrent_downloads());
    let manager = DownloadManager::new(extractor, transcoder, concurrency);

    if let Some(batch_file) = &args.batch_file {
        return run_batch_mode(&manager, batch_file, &options).await;
    }

    let url = args.url.as_deref().unwrap_or_default();

    if args.info {
        return show_info(&manager, url, &options).await;
    }

    download_single(&manager, url, &options).await
}

fn build_options(args: &Cli, config: &ConfigManager) -> DownloadOptions {
    let mut options = DownloadOptions::from_config(config);

    if let Some(dir) = &args.output_dir {
        options.output_dir = dir.clone();
    }
    if let Some(quality) = &args.quality {
        options.quality = quality.clone();
    }
    options.audio_only = args.audio_only;
    options.format_override = args.format.clone();
    options.allow_playlist = args.playlist;
    if args.no_subtitles {
        options.download_subtitles = false;
    }
    if args.no_thumbnail {
        options.download_thumbnail = false;
    }
    if args.no_metadata {
        options.write_metadata = false;
    }
    if let Some(proxy) = &args.proxy {
        options.proxy = Some(proxy.clone());
    }
    if let Some(rate) = args.rate_limit {
        options.rate_limit = rate;
    }
    if let Some(retries) = args.retries {
        options.retries = retries;
    }

    options
}

/// 仅显示视频信息
async fn show_info(manager: &DownloadManager, url: &str, options: &DownloadOptions) -> Result<()> {
    let metadata = manager.metadata(url, options).await?;

    println!("{}: {}", "标题".bold(), metadata.title_or_unknown());
    if let Some(uploader) = &metadata.uploader {
        println!("{}: {}", "作者".bold(), uploader);
    }
    println!("{}: {}", "时长".bold(), metadata.duration_display());
    if let Some(views) = metadata.view_count {
        println!("{}: {}", "播放量".bold(), views);
    }
    if let Some(date) = &metadata.upload_date {
        println!("{}: {}", "上传日期".bold(), date);
    }

    if !metadata.formats.is_empty() {
        println!("\n{}:", "可用格式".bold());
        for format in &metadata.formats {
            let size = format
                .filesize
                .map(format_bytes)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:>8}  {:>12}  {:>10}  {}",
                format.format_id,
                format.resolution.as_deref().unwrap_or("-"),
                size,
                format.ext.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}

/// 单链接下载，带进度条，Ctrl+C 取消
async fn download_single(
    manager: &DownloadManager,
    url: &str,
    options: &DownloadOptions,
) -> Result<()> {
    let task_id = manager.enqueue(url, options)?;

    // Ctrl+C 只取消任务，由状态轮询收尾
    {
        let manager = manager.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到 Ctrl+C，正在取消下载...");
                let _ = manager.cancel(&task_id);
            }
        });
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg}",
        )?
        .progress_chars("=>-"),
    );

    let task = loop {
        let Some(task) = manager.get_task(&task_id) else {
            return Err(downloader::DownloadError::TaskNotFound(task_id).into());
        };

        bar.set_position(task.progress as u64);
        let speed = task
            .speed
            .map(|s| format!("{}/s", format_bytes(s as u64)))
            .unwrap_or_default();
        bar.set_message(format!("{} {}", task.status, speed));

        if task.status.is_terminal() {
            break task;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    };

    bar.finish_and_clear();

    match task.status {
        TaskStatus::Completed => {
            if let Some(file) = &task.output_file {
                info!("{} {}", "下载完成:".green(), file.display());
            } else {
                info!("{}", "下载完成".green());
            }
            Ok(())
        }
        TaskStatus::Cancelled => {
            info!("{}", "下载已取消".yellow());
            Ok(())
        }
        _ => Err(task
            .error
            .unwrap_or_else(|| "下载失败".to_string())
            .into()),
    }
}

/// 批量下载模式
async fn run_batch_mode(
    manager: &DownloadManager,
    batch_file: &std::path::Path,
    options: &DownloadOptions,
) -> Result<()> {
    let report = downloader::run_batch(manager, batch_file, options).await?;

    println!("\n{}", "批量下载结果:".bold());
    for entry in &report.entries {
        match &entry.status {
            BatchEntryStatus::Completed => {
                println!("  {} {}", "✅".green(), entry.url);
            }
            BatchEntryStatus::Cancelled => {
                println!("  {} {} (已取消)", "⏹️".yellow(), entry.url);
            }
            BatchEntryStatus::Failed(reason) => {
                println!("  {} {} ({})", "❌".red(), entry.url, reason);
            }
        }
    }
    println!(
        "共 {} 个，成功 {}，失败 {}",
        report.total(),
        report.succeeded(),
        report.failed()
    );

    if report.failed() > 0 {
        return Err(format!("{} 个链接下载失败", report.failed()).into());
    }
    Ok(())
}
