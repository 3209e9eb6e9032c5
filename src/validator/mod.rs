use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("URL不能为空")]
    EmptyUrl,
    #[error("无效的URL格式: {0}")]
    InvalidUrl(String),
    #[error("不支持的平台，支持的平台: {0}")]
    UnsupportedPlatform(String),
}

/// 支持平台分类的平台标识
///
/// 分类结果是参考性的：未识别的平台会标记为 `Unknown`，
/// 由提取引擎决定能否下载（其自身支持 1700+ 网站）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Youtube,
    Twitter,
    Instagram,
    Tiktok,
    Bilibili,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
            Platform::Bilibili => "bilibili",
            Platform::Unknown => "unknown",
        }
    }

    /// 平台展示名称（用于 --list-platforms）
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube (youtube.com, youtu.be)",
            Platform::Twitter => "Twitter/X (twitter.com, x.com)",
            Platform::Instagram => "Instagram (instagram.com)",
            Platform::Tiktok => "TikTok (tiktok.com)",
            Platform::Bilibili => "Bilibili (bilibili.com, b23.tv)",
            Platform::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    // 平台模式表，按顺序匹配，先命中者优先
    static ref PLATFORM_PATTERNS: Vec<(Platform, Vec<Regex>)> = vec![
        (Platform::Youtube, vec![
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/watch\?v=[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtu\.be/[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/shorts/[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/playlist\?list=[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/channel/[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/@[\w-]+").unwrap(),
        ]),
        (Platform::Twitter, vec![
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?twitter\.com/\w+/status/\d+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?x\.com/\w+/status/\d+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?twitter\.com/i/web/status/\d+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?x\.com/i/web/status/\d+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:mobile\.)?twitter\.com/\w+/status/\d+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:mobile\.)?x\.com/\w+/status/\d+").unwrap(),
        ]),
        (Platform::Instagram, vec![
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?instagram\.com/p/[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?instagram\.com/reel/[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?instagram\.com/tv/[\w-]+").unwrap(),
        ]),
        (Platform::Tiktok, vec![
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?tiktok\.com/@[\w.-]+/video/\d+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?vm\.tiktok\.com/[\w-]+").unwrap(),
        ]),
        (Platform::Bilibili, vec![
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?bilibili\.com/video/[\w-]+").unwrap(),
            Regex::new(r"(?i)^(?:https?://)?(?:www\.)?b23\.tv/[\w-]+").unwrap(),
        ]),
    ];
}

/// 已识别的平台列表
pub fn supported_platforms() -> Vec<Platform> {
    PLATFORM_PATTERNS.iter().map(|(p, _)| *p).collect()
}

fn supported_platform_names() -> String {
    supported_platforms()
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 标准化URL：去除首尾空白，无协议时补全 https://
pub fn normalize_url(raw: &str) -> String {
    let url = raw.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// 检查URL是否格式完整（协议 + 主机）
pub fn is_well_formed(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// 检测URL所属平台，未命中任何模式时返回 Unknown
pub fn detect_platform(url: &str) -> Platform {
    let url = url.trim();
    for (platform, patterns) in PLATFORM_PATTERNS.iter() {
        if patterns.iter().any(|p| p.is_match(url)) {
            return *platform;
        }
    }
    Platform::Unknown
}

/// 验证并标准化URL
///
/// 成功时返回 (标准化URL, 平台)。格式不完整的输入返回 `InvalidUrl`；
/// 格式完整但未识别平台的输入返回 `UnsupportedPlatform`，
/// 调用方可以选择继续交给提取引擎处理。
pub fn validate_and_normalize(raw: &str) -> Result<(String, Platform), ValidateError> {
    if raw.trim().is_empty() {
        return Err(ValidateError::EmptyUrl);
    }

    let normalized = normalize_url(raw);

    if !is_well_formed(&normalized) {
        return Err(ValidateError::InvalidUrl(normalized));
    }

    match detect_platform(&normalized) {
        Platform::Unknown => Err(ValidateError::UnsupportedPlatform(supported_platform_names())),
        platform => Ok((normalized, platform)),
    }
}
