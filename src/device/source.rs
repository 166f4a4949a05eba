//! 哔哩哔哩客户端包名注册表与扫描目标

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiliSource {
    pub key: &'static str,
    pub package: &'static str,
    pub name: &'static str,
}

pub const BILI_SOURCES: [BiliSource; 2] = [
    BiliSource {
        key: "default",
        package: "tv.danmaku.bili",
        name: "哔哩哔哩",
    },
    BiliSource {
        key: "concept",
        package: "com.bilibili.app.blue",
        name: "哔哩哔哩概念版",
    },
];

pub const DEFAULT_SOURCE_KEY: &str = "default";

/// 设备端外部存储根目录
pub const REMOTE_STORAGE_ROOT: &str = "/sdcard";

pub fn find_source(key: &str) -> Option<&'static BiliSource> {
    BILI_SOURCES.iter().find(|s| s.key == key)
}

impl BiliSource {
    /// `Android/data/{package}/download`，相对存储根目录
    pub fn download_segments(&self) -> [&'static str; 4] {
        ["Android", "data", self.package, "download"]
    }

    pub fn remote_download_root(&self) -> String {
        format!("{}/{}", REMOTE_STORAGE_ROOT, self.download_segments().join("/"))
    }

    pub fn local_download_root(&self, storage_root: &Path) -> PathBuf {
        self.download_segments()
            .iter()
            .fold(storage_root.to_path_buf(), |p, seg| p.join(seg))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// 通过 adb shell / pull 访问
    RemoteShell,
    /// 已挂载的存储（盘符或路径前缀）
    LocalFilesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportTarget {
    /// adb 序列号，或本地存储根目录（如 `E:`）
    pub device_id: String,
    pub kind: TransportKind,
    pub source_key: String,
}

impl TransportTarget {
    pub fn new(device_id: impl Into<String>, kind: TransportKind, source_key: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            source_key: source_key.into(),
        }
    }

    pub fn source(&self) -> Option<&'static BiliSource> {
        find_source(&self.source_key)
    }

    /// 本地存储根目录；Windows 盘符补全为 `E:\`
    pub fn storage_root(&self) -> PathBuf {
        let id = self.device_id.as_str();
        if id.len() == 2 && id.ends_with(':') {
            PathBuf::from(format!("{}\\", id))
        } else {
            PathBuf::from(id)
        }
    }
}
