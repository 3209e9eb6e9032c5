use crate::validator::Platform;

/// 按平台和转码器可用性选择格式偏好
///
/// 各平台都优先 H.264：能直接拿到 H.264 就不需要转码，
/// 转码器只作为拿不到时的兜底。Twitter/X 是例外，
/// 有转码器时直接下载最高画质再转换。
pub fn format_for_platform(platform: Platform, transcoder_available: bool) -> &'static str {
    match (platform, transcoder_available) {
        (Platform::Bilibili, true) => {
            "bestvideo[vcodec^=avc][height<=1080]+bestaudio[acodec=aac]/bestvideo[vcodec^=avc][height<=720]+bestaudio[acodec=aac]/bestvideo[vcodec^=avc]+bestaudio/bestvideo[height<=1080]+bestaudio/best"
        }
        (Platform::Bilibili, false) => {
            "best[vcodec^=avc][height<=720]/best[vcodec^=avc]/best[height<=720]/best"
        }
        (Platform::Twitter, true) => "best[height<=1080]/best[height<=720]/best",
        (Platform::Twitter, false) => "best[vcodec^=avc]/best[height<=720]/best",
        (_, true) => {
            "bestvideo[vcodec^=avc]+bestaudio[acodec=aac]/bestvideo[vcodec^=avc]+bestaudio/bestvideo+bestaudio/best"
        }
        (_, false) => "best[vcodec^=avc]/best",
    }
}

/// 在平台偏好之上套用质量上限（best 表示不限制）
pub fn apply_quality_cap(base: &str, quality: &str) -> String {
    let height = match quality {
        "1080p" => 1080,
        "720p" => 720,
        "480p" => 480,
        "360p" => 360,
        _ => return base.to_string(),
    };

    // 逐个候选加上高度约束，保留兜底的 best
    let capped: Vec<String> = base
        .split('/')
        .map(|alt| {
            if alt == "best" {
                format!("best[height<={}]/best", height)
            } else {
                alt.split('+')
                    .map(|part| {
                        if part.starts_with("bestvideo") || part.starts_with("best[") || part == "best" {
                            insert_height_filter(part, height)
                        } else {
                            part.to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("+")
            }
        })
        .collect();

    capped.join("/")
}

fn insert_height_filter(selector: &str, height: u32) -> String {
    if selector.contains("height<=") {
        // 已有高度约束的保留更严格的那个
        return selector.to_string();
    }
    if selector.starts_with("bestaudio") {
        return selector.to_string();
    }
    format!("{}[height<={}]", selector, height)
}

/// 选择最终格式选择器
pub fn select_format(
    platform: Platform,
    quality: &str,
    transcoder_available: bool,
    format_override: Option<&str>,
) -> String {
    if let Some(explicit) = format_override {
        return explicit.to_string();
    }
    if quality == "worst" {
        return "worst".to_string();
    }
    let base = format_for_platform(platform, transcoder_available);
    apply_quality_cap(base, quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_preferred_even_with_transcoder() {
        // 有转码器也先找 H.264，转码只是兜底
        let fmt = format_for_platform(Platform::Bilibili, true);
        assert!(fmt.starts_with("bestvideo[vcodec^=avc]"), "fmt: {}", fmt);
        assert!(fmt.ends_with("/best"));

        let fmt = format_for_platform(Platform::Youtube, true);
        assert!(fmt.starts_with("bestvideo[vcodec^=avc]"), "fmt: {}", fmt);
    }

    #[test]
    fn test_twitter_downloads_best_then_converts() {
        // Twitter/X 例外：有转码器时直接拿最高画质
        assert_eq!(
            format_for_platform(Platform::Twitter, true),
            "best[height<=1080]/best[height<=720]/best"
        );
    }

    #[test]
    fn test_twitter_prefers_compatible_without_transcoder() {
        let fmt = format_for_platform(Platform::Twitter, false);
        assert!(fmt.starts_with("best[vcodec^=avc]"), "fmt: {}", fmt);
    }

    #[test]
    fn test_generic_family_without_transcoder() {
        assert_eq!(format_for_platform(Platform::Unknown, false), "best[vcodec^=avc]/best");
        assert_eq!(format_for_platform(Platform::Tiktok, false), "best[vcodec^=avc]/best");
        assert_eq!(
            format_for_platform(Platform::Instagram, true),
            format_for_platform(Platform::Youtube, true)
        );
    }

    #[test]
    fn test_quality_cap_applied() {
        let fmt = select_format(Platform::Youtube, "720p", true, None);
        assert!(fmt.contains("bestvideo[vcodec^=avc][height<=720]"), "fmt: {}", fmt);
    }

    #[test]
    fn test_existing_height_filter_kept() {
        // 链中已有的高度约束不被覆盖
        let fmt = select_format(Platform::Bilibili, "480p", true, None);
        assert!(fmt.contains("height<=1080"), "fmt: {}", fmt);
        assert!(fmt.contains("height<=720"), "fmt: {}", fmt);
    }

    #[test]
    fn test_best_quality_leaves_selector_unchanged() {
        let fmt = select_format(Platform::Twitter, "best", true, None);
        assert_eq!(fmt, "best[height<=1080]/best[height<=720]/best");
    }

    #[test]
    fn test_override_wins() {
        let fmt = select_format(Platform::Youtube, "360p", false, Some("137+140"));
        assert_eq!(fmt, "137+140");
    }

    #[test]
    fn test_audio_selector_not_capped() {
        let fmt = select_format(Platform::Youtube, "480p", true, None);
        assert!(fmt.contains("bestaudio"));
        assert!(!fmt.contains("bestaudio[height"));
        assert!(!fmt.contains("bestaudio[acodec=aac][height"));
    }
}
