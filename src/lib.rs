//! 哔哩哔哩安卓客户端缓存的发现与导出
//!
//! 通过 adb 或已挂载的存储访问设备，递归查找 `video.m4s` / `audio.m4s`
//! 分段对，向上读取 `entry.json` / `index.json` 补全元数据，并合并导出为 MP4。

pub mod cache;
pub mod config;
pub mod convert;
pub mod device;
pub mod filemgr;
pub mod logging;

pub use cache::{CachedVideo, ScanEvent, ScanOptions, ScanSession, ScanState, Scanner};
pub use convert::{ExportEvent, ExportJob, ExportSession, Exporter, Merger, Mp4BoxMerger};
pub use device::{connected_devices, Device, DeviceKind, TransportKind, TransportTarget};
