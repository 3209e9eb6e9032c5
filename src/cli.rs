use clap::Parser;
use std::path::PathBuf;

/// 多平台视频下载器
#[derive(Parser, Debug)]
#[command(name = "videodl")]
#[command(version)]
#[command(about = "一个支持多平台的视频下载工具 (YouTube/Twitter/Instagram/TikTok/Bilibili)", long_about = None)]
pub struct Cli {
    /// 视频链接 (无协议时自动补全 https://)
    #[arg(value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub url: Option<String>,

    /// 仅显示视频信息，不下载
    #[arg(long)]
    pub info: bool,

    /// 视频保存目录 (默认读取配置文件)
    #[arg(long, short = 'o', value_name = "DIR")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// 视频质量
    #[arg(long, short = 'q', value_name = "QUALITY")]
    #[arg(value_parser = ["best", "1080p", "720p", "480p", "360p", "worst"])]
    pub quality: Option<String>,

    /// 批量下载文件 (每行一个链接，# 开头为注释)
    #[arg(long, value_name = "FILE")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub batch_file: Option<PathBuf>,

    /// 仅下载音频 (提取为 mp3)
    #[arg(long)]
    pub audio_only: bool,

    /// 显式格式选择器 (覆盖质量选项)
    #[arg(long, short = 'f', value_name = "FORMAT")]
    pub format: Option<String>,

    /// 下载整个播放列表
    #[arg(long)]
    pub playlist: bool,

    /// 列出已识别的平台
    #[arg(long)]
    pub list_platforms: bool,

    /// 不下载字幕
    #[arg(long)]
    pub no_subtitles: bool,

    /// 不下载封面
    #[arg(long)]
    pub no_thumbnail: bool,

    /// 不保存元数据
    #[arg(long)]
    pub no_metadata: bool,

    /// 代理地址，如 http://127.0.0.1:7890
    #[arg(long, value_name = "PROXY")]
    pub proxy: Option<String>,

    /// 限速 (字节/秒)，0 表示不限速
    #[arg(long, value_name = "RATE")]
    pub rate_limit: Option<u64>,

    /// 失败重试次数
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// 配置文件路径
    #[arg(long, value_name = "FILE", default_value = "settings.ini")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// 最大并发下载数 (默认读取配置文件)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,
}
