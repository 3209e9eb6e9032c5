use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("保存配置文件失败: {0}")]
    SaveFailed(String),
}

type SectionMap = BTreeMap<String, BTreeMap<String, String>>;

// 配置文件各节的固定写出顺序
const SECTION_ORDER: [&str; 3] = ["DEFAULT", "GUI", "ADVANCED"];

/// 配置管理器
///
/// 基于 INI 文件的进程级配置，启动时加载一次，读多写少。
/// 读取失败回退到默认值并记录日志，从不向调用方抛出；
/// 写入通过 `set` 同步持久化，失败作为非致命错误返回。
#[derive(Clone)]
pub struct ConfigManager {
    config_file: PathBuf,
    sections: Arc<RwLock<SectionMap>>,
}

impl ConfigManager {
    /// 从文件加载配置，文件不存在时以默认配置落盘
    pub fn load(config_file: impl AsRef<Path>) -> Self {
        let config_file = config_file.as_ref().to_path_buf();
        let mut sections = default_sections();

        if config_file.exists() {
            match fs::read_to_string(&config_file) {
                Ok(content) => {
                    merge_ini(&mut sections, &content);
                    info!("配置文件加载成功: {}", config_file.display());
                }
                Err(e) => {
                    // 读取失败不影响启动，使用默认配置
                    error!("加载配置文件失败: {}", e);
                }
            }
        }

        let manager = Self {
            config_file,
            sections: Arc::new(RwLock::new(sections)),
        };

        if !manager.config_file.exists() {
            match manager.persist() {
                Ok(()) => info!("创建默认配置文件: {}", manager.config_file.display()),
                Err(e) => error!("{}", e),
            }
        }

        manager
    }

    /// 获取配置值
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.read_sections()
            .get(section)
            .and_then(|s| s.get(key))
            .cloned()
    }

    /// 获取配置值，缺失时返回默认值
    pub fn get_or(&self, section: &str, key: &str, fallback: &str) -> String {
        self.get(section, key).unwrap_or_else(|| fallback.to_string())
    }

    /// 获取整数配置值，缺失或解析失败时返回默认值
    pub fn get_int_or(&self, section: &str, key: &str, fallback: i64) -> i64 {
        self.get(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(fallback)
    }

    /// 获取布尔配置值（兼容 configparser 的 1/yes/true/on 写法）
    pub fn get_bool_or(&self, section: &str, key: &str, fallback: bool) -> bool {
        match self.get(section, key) {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "yes" | "true" | "on" => true,
                "0" | "no" | "false" | "off" => false,
                _ => fallback,
            },
            None => fallback,
        }
    }

    /// 设置配置值并同步持久化
    ///
    /// 写入失败只记录日志并返回错误，不影响内存中的配置。
    pub fn set(&self, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        {
            let mut sections = self.write_sections();
            sections
                .entry(section.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }

        if let Err(e) = self.persist() {
            warn!("设置配置失败: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// 获取下载路径（相对路径转为绝对路径，并确保目录存在）
    pub fn download_path(&self) -> PathBuf {
        let raw = self.get_or("DEFAULT", "download_path", "downloads");
        let mut path = PathBuf::from(raw);

        if path.is_relative() {
            if let Ok(cwd) = std::env::current_dir() {
                path = cwd.join(path);
            }
        }

        if !path.exists() {
            match fs::create_dir_all(&path) {
                Ok(()) => info!("创建下载目录: {}", path.display()),
                Err(e) => error!("创建下载目录失败 {}: {}", path.display(), e),
            }
        }

        path
    }

    pub fn video_quality(&self) -> String {
        self.get_or("DEFAULT", "video_quality", "best")
    }

    pub fn max_concurrent_downloads(&self) -> usize {
        self.get_int_or("DEFAULT", "max_concurrent_downloads", 3).max(1) as usize
    }

    pub fn retry_attempts(&self) -> u32 {
        self.get_int_or("DEFAULT", "retry_attempts", 3).max(0) as u32
    }

    pub fn timeout_secs(&self) -> u64 {
        self.get_int_or("DEFAULT", "timeout", 30).max(1) as u64
    }

    fn read_sections(&self) -> RwLockReadGuard<'_, SectionMap> {
        self.sections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_sections(&self) -> RwLockWriteGuard<'_, SectionMap> {
        self.sections.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self) -> Result<(), ConfigError> {
        if let Some(dir) = self.config_file.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)
                    .map_err(|e| ConfigError::SaveFailed(format!("创建配置目录失败: {}", e)))?;
            }
        }

        let content = serialize_ini(&self.read_sections());
        fs::write(&self.config_file, content)
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        Ok(())
    }
}

/// 默认配置
fn default_sections() -> SectionMap {
    let mut sections = SectionMap::new();

    let default: BTreeMap<String, String> = [
        ("download_path", "downloads"),
        ("video_quality", "best"),
        ("audio_quality", "best"),
        ("max_concurrent_downloads", "3"),
        ("enable_subtitles", "False"),
        ("subtitle_language", "zh-CN"),
        ("enable_thumbnail", "True"),
        ("enable_metadata", "True"),
        ("retry_attempts", "3"),
        ("timeout", "30"),
        ("auto_convert_av1_to_h264", "True"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let gui: BTreeMap<String, String> = [
        ("window_width", "800"),
        ("window_height", "600"),
        ("theme", "default"),
        ("auto_start_download", "False"),
        ("show_download_progress", "True"),
        ("minimize_to_tray", "False"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let advanced: BTreeMap<String, String> = [
        (
            "user_agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        ),
        ("proxy", ""),
        ("cookies_file", ""),
        ("rate_limit", "0"),
        ("extract_flat", "False"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    sections.insert("DEFAULT".to_string(), default);
    sections.insert("GUI".to_string(), gui);
    sections.insert("ADVANCED".to_string(), advanced);
    sections
}

/// 将 INI 文本合并进现有配置（文件中的值覆盖默认值）
fn merge_ini(sections: &mut SectionMap, content: &str) {
    let mut current = "DEFAULT".to_string();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current = line[1..line.len() - 1].trim().to_string();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
}

fn serialize_ini(sections: &SectionMap) -> String {
    let mut out = String::new();

    let mut names: Vec<&str> = SECTION_ORDER
        .iter()
        .copied()
        .filter(|name| sections.contains_key(*name))
        .collect();
    for name in sections.keys() {
        if !SECTION_ORDER.contains(&name.as_str()) {
            names.push(name);
        }
    }

    for name in names {
        out.push_str(&format!("[{}]\n", name));
        if let Some(section) = sections.get(name) {
            for (key, value) in section {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_materialized_when_file_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("settings.ini");
        let config = ConfigManager::load(&path);

        assert!(path.exists());
        assert_eq!(config.get_or("DEFAULT", "video_quality", ""), "best");
        assert_eq!(config.max_concurrent_downloads(), 3);
        assert_eq!(config.retry_attempts(), 3);
        assert_eq!(config.timeout_secs(), 30);
        assert!(!config.get_bool_or("DEFAULT", "enable_subtitles", true));
        assert!(config.get_bool_or("DEFAULT", "enable_thumbnail", false));
        assert!(config.get_bool_or("DEFAULT", "enable_metadata", false));
    }

    #[test]
    fn test_set_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.ini");

        let config = ConfigManager::load(&path);
        config.set("DEFAULT", "video_quality", "720p").unwrap();
        config.set("CUSTOM", "key", "value").unwrap();

        let reloaded = ConfigManager::load(&path);
        assert_eq!(reloaded.get_or("DEFAULT", "video_quality", ""), "720p");
        assert_eq!(reloaded.get("CUSTOM", "key").as_deref(), Some("value"));
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.ini");
        fs::write(
            &path,
            "[DEFAULT]\nmax_concurrent_downloads = 5\n\n[ADVANCED]\nproxy = http://localhost:8080\n",
        )
        .unwrap();

        let config = ConfigManager::load(&path);
        assert_eq!(config.max_concurrent_downloads(), 5);
        assert_eq!(
            config.get_or("ADVANCED", "proxy", ""),
            "http://localhost:8080"
        );
        // 未覆盖的键保持默认值
        assert_eq!(config.get_or("DEFAULT", "video_quality", ""), "best");
    }

    #[test]
    fn test_bool_parsing_variants() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.ini");
        fs::write(&path, "[DEFAULT]\na = yes\nb = Off\nc = garbage\n").unwrap();

        let config = ConfigManager::load(&path);
        assert!(config.get_bool_or("DEFAULT", "a", false));
        assert!(!config.get_bool_or("DEFAULT", "b", true));
        assert!(config.get_bool_or("DEFAULT", "c", true));
    }

    #[test]
    fn test_int_fallback_on_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.ini");
        fs::write(&path, "[DEFAULT]\nretry_attempts = notanumber\n").unwrap();

        let config = ConfigManager::load(&path);
        assert_eq!(config.retry_attempts(), 3);
    }
}
