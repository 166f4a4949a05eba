//! 以存储设备方式挂载的手机（盘符或挂载点）

use super::source::BILI_SOURCES;
use super::{Device, DeviceKind};
use std::path::{Path, PathBuf};

/// 候选存储根目录：Windows 为 `D:`–`Z:`，其他平台为常见挂载目录下的子目录
pub fn candidate_roots() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        ('D'..='Z').map(|c| PathBuf::from(format!("{}:\\", c))).collect()
    }
    #[cfg(not(target_os = "windows"))]
    {
        let mut bases = vec![PathBuf::from("/media"), PathBuf::from("/mnt"), PathBuf::from("/Volumes")];
        if let Ok(user) = std::env::var("USER") {
            bases.push(PathBuf::from("/run/media").join(&user));
            bases.push(PathBuf::from("/media").join(user));
        }
        bases
            .iter()
            .filter_map(|b| std::fs::read_dir(b).ok())
            .flat_map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect()
    }
}

/// 含任一已登记客户端下载目录的存储根
pub fn drive_devices_in(roots: &[PathBuf]) -> Vec<Device> {
    roots
        .iter()
        .filter(|root| has_bili_download(root))
        .map(|root| {
            let id = drive_id(root);
            Device {
                name: format!("存储设备 ({})", id),
                id,
                kind: DeviceKind::Drive,
            }
        })
        .collect()
}

pub fn drive_devices() -> Vec<Device> {
    drive_devices_in(&candidate_roots())
}

fn has_bili_download(root: &Path) -> bool {
    if !root.join("Android").join("data").is_dir() {
        return false;
    }
    BILI_SOURCES
        .iter()
        .any(|s| s.local_download_root(root).is_dir())
}

/// `E:\` → `E:`；其他路径原样
fn drive_id(root: &Path) -> String {
    let s = root.to_string_lossy();
    let trimmed = s.trim_end_matches(['\\', '/']);
    if trimmed.len() == 2 && trimmed.ends_with(':') {
        trimmed.to_string()
    } else {
        s.into_owned()
    }
}
