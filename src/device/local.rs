//! 已挂载存储（USB 大容量存储 / MTP 盘符）上的缓存访问

use super::source::TransportKind;
use super::transport::{parse_json_object, DirEntry, EntryKind, Transport};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    type Location = PathBuf;

    fn kind(&self) -> TransportKind {
        TransportKind::LocalFilesystem
    }

    fn join(&self, dir: &PathBuf, name: &str) -> PathBuf {
        dir.join(name)
    }

    fn parent(&self, loc: &PathBuf) -> Option<PathBuf> {
        loc.parent().map(Path::to_path_buf)
    }

    fn file_name(&self, loc: &PathBuf) -> Option<String> {
        loc.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    fn to_record_path(&self, loc: &PathBuf) -> PathBuf {
        loc.clone()
    }

    fn from_record_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    /// 按文件名排序，保证重复扫描顺序一致
    fn list_dir(&self, dir: &PathBuf) -> Vec<DirEntry> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(err) => {
                    debug!("列目录失败 {}: {}", dir.display(), err);
                    None
                }
            })
            .map(|e| {
                let kind = if e.file_type().is_dir() {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                };
                DirEntry::new(e.file_name().to_string_lossy(), kind)
            })
            .collect()
    }

    fn read_json(&self, file: &PathBuf) -> Option<Value> {
        match std::fs::read(file) {
            Ok(bytes) => Some(parse_json_object(&bytes)),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("读取 JSON 失败 {}: {}", file.display(), e);
                }
                None
            }
        }
    }

    fn file_sizes(&self, files: &[PathBuf]) -> Vec<u64> {
        files
            .iter()
            .map(|f| std::fs::metadata(f).map(|m| m.len()).unwrap_or(0))
            .collect()
    }

    /// 文件本已在本地；目标与源相同时不做任何事
    fn copy_to_local(&self, file: &PathBuf, dest: &Path, _timeout: Duration) -> bool {
        if file.as_path() == dest {
            return file.is_file();
        }
        match std::fs::copy(file, dest) {
            Ok(_) => true,
            Err(e) => {
                debug!("复制失败 {} -> {}: {}", file.display(), dest.display(), e);
                false
            }
        }
    }

    fn fetch(&self, file: &PathBuf, _dest: &Path, _timeout: Duration) -> Option<PathBuf> {
        file.is_file().then(|| file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::empty_object;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_dir_sorted_with_kinds() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("b")).unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("c.json"), b"{}").unwrap();

        let t = LocalTransport::new();
        let entries = t.list_dir(&tmp.path().to_path_buf());
        assert_eq!(
            entries,
            vec![
                DirEntry::new("a", EntryKind::Dir),
                DirEntry::new("b", EntryKind::Dir),
                DirEntry::new("c.json", EntryKind::File),
            ]
        );
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let t = LocalTransport::new();
        assert!(t.list_dir(&PathBuf::from("/definitely/not/here")).is_empty());
    }

    #[test]
    fn test_read_json_and_sizes() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("entry.json");
        let bad = tmp.path().join("index.json");
        fs::write(&good, br#"{"title":"t"}"#).unwrap();
        fs::write(&bad, b"not json").unwrap();

        let t = LocalTransport::new();
        assert_eq!(t.read_json(&good).unwrap()["title"], "t");
        assert_eq!(t.read_json(&bad), Some(empty_object()));
        assert_eq!(t.read_json(&tmp.path().join("missing.json")), None);
        assert_eq!(
            t.file_sizes(&[good.clone(), tmp.path().join("missing")]),
            vec![13, 0]
        );
    }

    #[test]
    fn test_fetch_returns_original_path() {
        let tmp = TempDir::new().unwrap();
        let cover = tmp.path().join("cover.jpg");
        fs::write(&cover, b"jpg").unwrap();
        let t = LocalTransport::new();
        let dest = tmp.path().join("elsewhere.jpg");
        assert_eq!(t.fetch(&cover, &dest, Duration::ZERO), Some(cover.clone()));
        assert!(!dest.exists());
        assert_eq!(t.fetch(&tmp.path().join("none.jpg"), &dest, Duration::ZERO), None);
    }
}
