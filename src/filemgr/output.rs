//! 输出路径与文件名安全化

use std::path::{Path, PathBuf};

const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FILENAME_LEN: usize = 180;
const FALLBACK_NAME: &str = "未命名";

/// 非法字符替换为 `_`，去掉控制字符，截断后去除首尾空白（保留中文、emoji）
pub fn sanitize_filename(name: &str) -> String {
    let s: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .take(MAX_FILENAME_LEN)
        .collect();
    let s = s.trim();
    if s.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        s.to_string()
    }
}

/// 生成输出文件路径：out_dir / {title}.mp4
pub fn output_path(out_dir: &Path, title: &str) -> PathBuf {
    out_dir.join(format!("{}.mp4", sanitize_filename(title)))
}
