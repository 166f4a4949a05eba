//! 访问缓存目录的能力集合，本地文件系统与 adb 各实现一份
//!
//! 所有操作尽力而为：任何失败都退化为空值、`None` 或 `false`，不向上传递，
//! 单个不可读的目录或 sidecar 不应中断整个扫描。

use super::source::TransportKind;
use serde_json::Value;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// sidecar 小文件拉取超时
pub const SIDECAR_TIMEOUT: Duration = Duration::from_secs(10);
/// 封面拉取超时
pub const COVER_TIMEOUT: Duration = Duration::from_secs(15);
/// 导出时媒体分段拉取超时
pub const SEGMENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    /// 远端 `ls -1` 不区分文件与目录
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// 是否值得递归进入
    pub fn may_be_dir(&self) -> bool {
        match self.kind {
            EntryKind::Dir => true,
            EntryKind::File => false,
            EntryKind::Unknown => !has_file_extension(&self.name),
        }
    }
}

/// 缓存目录中常见的文件后缀，远端无法区分类型时据此跳过
const FILE_EXTENSIONS: [&str; 8] = ["json", "m4s", "jpg", "png", "xml", "blv", "txt", "mp4"];

fn has_file_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub trait Transport {
    /// 本地为 `PathBuf`，远端为 `/` 拼接的字符串
    type Location: Clone + Debug + PartialEq;

    fn kind(&self) -> TransportKind;

    fn join(&self, dir: &Self::Location, name: &str) -> Self::Location;

    fn parent(&self, loc: &Self::Location) -> Option<Self::Location>;

    fn file_name(&self, loc: &Self::Location) -> Option<String>;

    /// 记录到 `CachedVideo` 中的路径
    fn to_record_path(&self, loc: &Self::Location) -> PathBuf;

    fn from_record_path(&self, path: &Path) -> Self::Location;

    /// 非递归列出目录，不含 `.` / `..`；失败时为空
    fn list_dir(&self, dir: &Self::Location) -> Vec<DirEntry>;

    /// 下载根目录的列表，远端允许更长的超时
    fn list_root(&self, dir: &Self::Location) -> Vec<DirEntry> {
        self.list_dir(dir)
    }

    /// 读取并解析小体积 JSON 文件。文件不存在或无法读取时为 `None`；
    /// 存在但内容无效时为空对象
    fn read_json(&self, file: &Self::Location) -> Option<Value>;

    /// 批量查询文件大小（字节），顺序与输入一致；无法查询的项为 0
    fn file_sizes(&self, files: &[Self::Location]) -> Vec<u64>;

    /// 复制到本地 `dest`
    fn copy_to_local(&self, file: &Self::Location, dest: &Path, timeout: Duration) -> bool;

    /// 取得文件的本地可读路径；本地传输直接返回原路径
    fn fetch(&self, file: &Self::Location, dest: &Path, timeout: Duration) -> Option<PathBuf> {
        self.copy_to_local(file, dest, timeout)
            .then(|| dest.to_path_buf())
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// 解析 JSON 字节；非对象或解析失败均视为空对象
pub(crate) fn parse_json_object(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) => empty_object(),
        Err(e) => {
            tracing::debug!("JSON 解析失败: {}", e);
            empty_object()
        }
    }
}
