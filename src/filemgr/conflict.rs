//! 文件冲突处理：从不静默覆盖已存在的文件

use super::output;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// 跳过并给出提示
    Skip,
    /// 自动重命名，如 标题_1.mp4
    #[default]
    Rename,
}

impl ConflictStrategy {
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            Some("skip") => ConflictStrategy::Skip,
            _ => ConflictStrategy::Rename,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("文件已存在，跳过: {}", .0.display())]
    Skip(PathBuf),
}

/// 根据策略解析最终输出路径
pub fn resolve_output_path(
    out_dir: &Path,
    title: &str,
    strategy: ConflictStrategy,
) -> Result<PathBuf, ConflictError> {
    let path = output::output_path(out_dir, title);
    if !path.exists() {
        return Ok(path);
    }

    match strategy {
        ConflictStrategy::Skip => Err(ConflictError::Skip(path)),
        ConflictStrategy::Rename => {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("video").to_string();
            let mut n = 1;
            loop {
                let next = out_dir.join(format!("{}_{}.mp4", stem, n));
                if !next.exists() {
                    break Ok(next);
                }
                n += 1;
            }
        }
    }
}
