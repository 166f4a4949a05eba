//! 递归查找 video.m4s + audio.m4s，并向上查找 sidecar 补全元数据
//!
//! 常见布局：`download/<av号>/<c_xxx>/<清晰度>/video.m4s`，
//! entry.json 与 cover.jpg 位于 `<c_xxx>` 目录。

use super::parser::{
    bytes_to_mb, fallback_title, parse_technical_descriptor, parse_title_descriptor, CachedVideo, AUDIO_SEGMENT,
    COVER_IMAGE, TECHNICAL_DESCRIPTOR, TITLE_DESCRIPTOR, VIDEO_SEGMENT,
};
use super::quality::{quality_from_dir_name, resolve_quality};
use crate::device::transport::{DirEntry, Transport, COVER_TIMEOUT};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// 向上查找 sidecar 的层数（含分段目录本身）
pub const DEFAULT_SIDECAR_DEPTH: usize = 5;

/// 远端封面缓存目录，扫描结束后保留供界面显示
pub fn default_cover_cache_dir() -> PathBuf {
    std::env::temp_dir().join("biliandout_covers")
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub sidecar_depth: usize,
    pub cover_cache: PathBuf,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            sidecar_depth: DEFAULT_SIDECAR_DEPTH,
            cover_cache: default_cover_cache_dir(),
        }
    }
}

/// 顶层目录（下载根目录的直接子目录）
#[derive(Debug, Clone, PartialEq)]
pub struct TopFolder<L> {
    pub name: String,
    pub location: L,
}

pub struct CacheWalker<'a, T: Transport> {
    transport: &'a T,
    root: T::Location,
    options: WalkOptions,
    cancelled: Option<&'a AtomicBool>,
}

impl<'a, T: Transport> CacheWalker<'a, T> {
    pub fn new(transport: &'a T, root: T::Location, options: WalkOptions) -> Self {
        Self {
            transport,
            root,
            options,
            cancelled: None,
        }
    }

    /// `walk` 在顶层目录边界检查该标志；已开始的顶层目录总会完整遍历，
    /// 其中的每条记录都带有完整的元数据
    pub fn with_cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancelled = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn top_level_folders(&self) -> Vec<TopFolder<T::Location>> {
        self.transport
            .list_root(&self.root)
            .into_iter()
            .filter(DirEntry::may_be_dir)
            .map(|e| TopFolder {
                location: self.transport.join(&self.root, &e.name),
                name: e.name,
            })
            .collect()
    }

    /// 一次性遍历全部顶层目录
    pub fn walk(&self) -> Vec<CachedVideo> {
        let mut videos = Vec::new();
        for folder in self.top_level_folders() {
            if self.is_cancelled() {
                break;
            }
            self.walk_folder(&folder, &mut |v| videos.push(v));
        }
        videos
    }

    /// 深度优先遍历单个顶层目录，每找到一对分段立即回调（不检查取消）
    pub fn walk_folder(&self, folder: &TopFolder<T::Location>, on_found: &mut dyn FnMut(CachedVideo)) {
        self.descend(&folder.location, &folder.name, on_found);
    }

    fn descend(&self, dir: &T::Location, root_folder: &str, on_found: &mut dyn FnMut(CachedVideo)) {
        let entries = self.transport.list_dir(dir);
        let has = |name: &str| entries.iter().any(|e| e.name == name);

        // 满足成对条件的目录不再向下递归
        if has(VIDEO_SEGMENT) && has(AUDIO_SEGMENT) {
            let video = self.resolve_pair(dir, &entries, root_folder);
            on_found(video);
            return;
        }
        for entry in entries.iter().filter(|e| e.may_be_dir()) {
            let sub = self.transport.join(dir, &entry.name);
            self.descend(&sub, root_folder, on_found);
        }
    }

    fn resolve_pair(&self, dir: &T::Location, entries: &[DirEntry], root_folder: &str) -> CachedVideo {
        let t = self.transport;

        let technical = if entries.iter().any(|e| e.name == TECHNICAL_DESCRIPTOR) {
            t.read_json(&t.join(dir, TECHNICAL_DESCRIPTOR))
                .map(|data| parse_technical_descriptor(&data))
                .unwrap_or_default()
        } else {
            Default::default()
        };

        let mut title = fallback_title(root_folder).to_string();
        let mut bvid = String::new();
        let mut part_title = String::new();
        let mut quality_code = 0;

        // 向上查找 entry.json：第一个存在的即停止，即使内容无效
        let mut visited = Vec::new();
        let mut level = Some(dir.clone());
        for _ in 0..self.options.sidecar_depth {
            let Some(current) = level.take() else { break };
            if current == self.root {
                break;
            }
            let data = t.read_json(&t.join(&current, TITLE_DESCRIPTOR));
            level = t.parent(&current);
            visited.push(current);
            if let Some(data) = data {
                let found = parse_title_descriptor(&data, &title);
                title = found.title;
                bvid = found.bvid;
                part_title = found.part_title;
                quality_code = found.quality_code;
                break;
            }
        }

        // 封面取已查找各层中最近的一个
        let cover_id = if bvid.is_empty() { root_folder } else { bvid.as_str() };
        let cover_path = visited
            .iter()
            .find_map(|level| self.find_cover(level, cover_id));

        if quality_code == 0 {
            quality_code = t
                .file_name(dir)
                .and_then(|n| quality_from_dir_name(&n))
                .unwrap_or(0);
        }

        let video = t.join(dir, VIDEO_SEGMENT);
        let audio = t.join(dir, AUDIO_SEGMENT);
        let size_mb = bytes_to_mb(t.file_sizes(&[video.clone(), audio.clone()]).iter().sum());

        CachedVideo {
            folder_path: t.to_record_path(dir),
            video_path: t.to_record_path(&video),
            audio_path: t.to_record_path(&audio),
            title,
            part_title,
            size_mb,
            bvid,
            quality: resolve_quality(quality_code),
            resolution: technical.resolution,
            frame_rate: technical.frame_rate,
            cover_path,
        }
    }

    /// 远端封面缓存为 `md5("{目录}_{bvid 或顶层目录名}").jpg`
    fn find_cover(&self, dir: &T::Location, cover_id: &str) -> Option<PathBuf> {
        let t = self.transport;
        let key = format!("{}_{}", t.to_record_path(dir).display(), cover_id);
        let dest = self
            .options
            .cover_cache
            .join(format!("{:x}.jpg", md5::compute(key.as_bytes())));
        if let Err(e) = std::fs::create_dir_all(&self.options.cover_cache) {
            debug!("无法创建封面缓存目录: {}", e);
        }
        t.fetch(&t.join(dir, COVER_IMAGE), &dest, COVER_TIMEOUT)
    }
}
