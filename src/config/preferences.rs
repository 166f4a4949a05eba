//! 偏好配置持久化

use crate::cache::walker::DEFAULT_SIDECAR_DEPTH;
use crate::device::source::DEFAULT_SOURCE_KEY;
use crate::filemgr::ConflictStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 默认输出目录
    pub output_dir: Option<String>,
    /// 客户端来源：default | concept
    pub source_key: Option<String>,
    /// 冲突策略：rename | skip
    pub conflict_strategy: Option<String>,
    pub mp4box_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub adb_path: Option<String>,
    /// 向上查找 entry.json / index.json 的层数
    pub sidecar_search_depth: Option<usize>,
}

impl AppConfig {
    pub fn conflict_strategy(&self) -> ConflictStrategy {
        ConflictStrategy::from_config(self.conflict_strategy.as_deref())
    }

    pub fn source_key(&self) -> &str {
        self.source_key.as_deref().unwrap_or(DEFAULT_SOURCE_KEY)
    }

    pub fn sidecar_search_depth(&self) -> usize {
        self.sidecar_search_depth
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_SIDECAR_DEPTH)
    }

    /// 未配置时为 下载目录/biliandout
    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::download_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join("biliandout"),
        }
    }
}

/// 配置文件路径：<配置目录>/biliandout/config.json
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("biliandout").join("config.json"))
}

pub fn load_config() -> AppConfig {
    get_config_path()
        .map(|p| load_config_from(&p))
        .unwrap_or_default()
}

/// 文件不存在或内容无效时返回默认配置
pub fn load_config_from(path: &Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::default();
    }
    match std::fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            debug!("配置文件无效 {}: {}", path.display(), e);
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}

pub fn save_config(config: &AppConfig) -> std::io::Result<()> {
    match get_config_path() {
        Some(p) => save_config_to(&p, config),
        None => Ok(()),
    }
}

pub fn save_config_to(path: &Path, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let s = serde_json::to_string_pretty(config)?;
    std::fs::write(path, s)
}

/// Homebrew 常见路径（从 Finder 启动时 PATH 不含这些，需显式查找）
#[cfg(target_os = "macos")]
const TOOL_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin"];

/// Windows 常见安装路径
#[cfg(target_os = "windows")]
const TOOL_DIRS: &[&str] = &[
    r"C:\Program Files\GPAC",
    r"C:\Program Files (x86)\GPAC",
    r"C:\ffmpeg\bin",
    r"C:\Program Files\ffmpeg\bin",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const TOOL_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin"];

#[cfg(target_os = "windows")]
fn executable_name(name: &str) -> String {
    format!("{}.exe", name)
}

#[cfg(not(target_os = "windows"))]
fn executable_name(name: &str) -> String {
    name.to_string()
}

/// 优先配置，其次 which/where，再平台常见目录，最后默认名称
fn resolve_tool(configured: Option<&str>, name: &str) -> String {
    if let Some(p) = configured {
        if Path::new(p).exists() {
            return p.to_string();
        }
        debug!("配置的 {} 路径不存在: {}", name, p);
    }
    if let Some(path) = which(name) {
        return path;
    }
    let exe = executable_name(name);
    TOOL_DIRS
        .iter()
        .map(|base| Path::new(base).join(&exe))
        .find(|p| p.exists())
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or(exe)
}

pub fn resolve_mp4box_path(config: &AppConfig) -> String {
    resolve_tool(config.mp4box_path.as_deref(), "MP4Box")
}

/// 兜底合并用
pub fn resolve_ffmpeg_path(config: &AppConfig) -> String {
    resolve_tool(config.ffmpeg_path.as_deref(), "ffmpeg")
}

#[cfg(unix)]
const WHICH: &str = "which";
#[cfg(windows)]
const WHICH: &str = "where";

fn which(name: &str) -> Option<String> {
    let output = crate::device::command::hidden_command(WHICH).arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.conflict_strategy(), ConflictStrategy::Rename);
        assert_eq!(c.source_key(), "default");
        assert_eq!(c.sidecar_search_depth(), DEFAULT_SIDECAR_DEPTH);
    }

    #[test]
    fn test_round_trip_and_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("biliandout/config.json");
        let config = AppConfig {
            output_dir: Some("/tmp/out".into()),
            conflict_strategy: Some("skip".into()),
            sidecar_search_depth: Some(3),
            ..AppConfig::default()
        };
        save_config_to(&path, &config).unwrap();
        let loaded = load_config_from(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.conflict_strategy(), ConflictStrategy::Skip);
        assert_eq!(loaded.output_dir(), PathBuf::from("/tmp/out"));

        std::fs::write(&path, r#"{"source_key":"concept"}"#).unwrap();
        assert_eq!(load_config_from(&path).source_key(), "concept");
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_config_from(&path), AppConfig::default());
        assert_eq!(load_config_from(&tmp.path().join("missing.json")), AppConfig::default());
    }

    #[test]
    fn test_zero_depth_uses_default() {
        let c = AppConfig {
            sidecar_search_depth: Some(0),
            ..AppConfig::default()
        };
        assert_eq!(c.sidecar_search_depth(), DEFAULT_SIDECAR_DEPTH);
    }

    #[test]
    fn test_configured_tool_path_wins() {
        let tmp = TempDir::new().unwrap();
        let tool = tmp.path().join("MP4Box");
        std::fs::write(&tool, b"").unwrap();
        let c = AppConfig {
            mp4box_path: Some(tool.to_string_lossy().into_owned()),
            ..AppConfig::default()
        };
        assert_eq!(resolve_mp4box_path(&c), tool.to_string_lossy());
    }
}
