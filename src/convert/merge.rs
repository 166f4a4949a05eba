//! 分段合并为 MP4
//! 支持新版 B 站 m4s 的 9 字节头部填充去除

use crate::cache::parser::{AUDIO_SEGMENT, VIDEO_SEGMENT};
use crate::device::command::{hidden_command, truncate_message};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const STDERR_MESSAGE_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("文件不存在: {0}")]
    FileNotFound(String),
    #[error("分段拉取失败: {0}")]
    StageFailed(String),
    #[error("MP4Box 未找到，请安装 gpac")]
    Mp4BoxNotFound,
    #[error("合并失败: {0}")]
    MergeFailed(String),
    #[error("用户取消")]
    Cancelled,
    #[error("冲突策略跳过")]
    Skipped(#[from] crate::filemgr::ConflictError),
    #[error("临时文件错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 将目录中的 `video.m4s` 与 `audio.m4s` 合并为 `dest`
pub trait Merger: Send + Sync {
    fn combine(&self, source_dir: &Path, dest: &Path) -> Result<(), ConvertError>;
}

const M4S_HEADER_PADDING: [u8; 9] = [0x30; 9];

/// 若 m4s 含 9 字节 0x30 填充，去除后写入 `scratch` 并返回新路径；否则返回原路径
fn ensure_clean_m4s(path: &Path, scratch: &Path) -> Result<PathBuf, std::io::Error> {
    let mut f = File::open(path)?;
    let mut header = [0u8; 9];
    if f.read_exact(&mut header).is_err() || header != M4S_HEADER_PADDING {
        return Ok(path.to_path_buf());
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("segment.m4s");
    let clean = scratch.join(name);
    let mut out = File::create(&clean)?;
    std::io::copy(&mut f, &mut out)?;
    debug!("已去除头部填充: {}", path.display());
    Ok(clean)
}

/// MP4Box `#video/#audio` → MP4Box `:raw` → ffmpeg `-c copy`，依次尝试
#[derive(Debug, Clone)]
pub struct Mp4BoxMerger {
    mp4box: String,
    ffmpeg: String,
}

impl Mp4BoxMerger {
    pub fn new(mp4box: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            mp4box: mp4box.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    fn run_mp4box(&self, video: &Path, audio: &Path, dest: &Path, raw: bool) -> Result<(), ConvertError> {
        let suffix = if raw { ":raw" } else { "" };
        let mut cmd = hidden_command(&self.mp4box);
        cmd.arg("-add")
            .arg(format!("{}#video{}", video.to_string_lossy(), suffix))
            .arg("-add")
            .arg(format!("{}#audio{}", audio.to_string_lossy(), suffix))
            .arg("-new")
            .arg(dest)
            .args(["-itags", "tool=biliandout"]);
        let output = cmd.output().map_err(|_| ConvertError::Mp4BoxNotFound)?;
        if output.status.success() {
            return Ok(());
        }
        let _ = std::fs::remove_file(dest);
        Err(ConvertError::MergeFailed(truncate_message(
            &String::from_utf8_lossy(&output.stderr),
            STDERR_MESSAGE_LEN,
        )))
    }

    fn run_ffmpeg(&self, video: &Path, audio: &Path, dest: &Path) -> Result<(), ConvertError> {
        let mut cmd = hidden_command(&self.ffmpeg);
        cmd.args(["-y", "-i"])
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c", "copy", "-movflags", "+faststart"])
            .arg(dest);
        let output = cmd
            .output()
            .map_err(|_| ConvertError::MergeFailed("ffmpeg 未找到".to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let _ = std::fs::remove_file(dest);
        Err(ConvertError::MergeFailed(format!(
            "ffmpeg: {}",
            truncate_message(&String::from_utf8_lossy(&output.stderr), STDERR_MESSAGE_LEN)
        )))
    }
}

impl Merger for Mp4BoxMerger {
    fn combine(&self, source_dir: &Path, dest: &Path) -> Result<(), ConvertError> {
        let video = source_dir.join(VIDEO_SEGMENT);
        let audio = source_dir.join(AUDIO_SEGMENT);
        for p in [&video, &audio] {
            if !p.is_file() {
                return Err(ConvertError::FileNotFound(p.display().to_string()));
            }
        }

        // 去除填充后的副本随 scratch 一起删除
        let scratch = tempfile::Builder::new().prefix("biliandout-m4s-").tempdir()?;
        let video = ensure_clean_m4s(&video, scratch.path())?;
        let audio = ensure_clean_m4s(&audio, scratch.path())?;

        let first = match self.run_mp4box(&video, &audio, dest, false) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        debug!("MP4Box 失败，改用 :raw 模式: {}", first);
        if !matches!(first, ConvertError::Mp4BoxNotFound) {
            match self.run_mp4box(&video, &audio, dest, true) {
                Ok(()) => return Ok(()),
                Err(e) => debug!("MP4Box :raw 失败: {}", e),
            }
        }
        info!("改用 ffmpeg 合并: {}", dest.display());
        self.run_ffmpeg(&video, &audio, dest)
    }
}
