//! 导出：逐条拉取分段并合并，可取消
//!
//! 严格串行处理。每条开始前检查取消标志，进行中的一条总会完成。
//! 单条失败只产生一条 `Error`，不会中断整批；最后恰好发送一次 `Finished`。

use super::merge::{ConvertError, Merger};
use crate::cache::parser::{CachedVideo, AUDIO_SEGMENT, VIDEO_SEGMENT};
use crate::device::command::truncate_message;
use crate::device::transport::SEGMENT_TIMEOUT;
use crate::device::{adb, AdbTransport, LocalTransport, Transport, TransportKind, TransportTarget};
use crate::filemgr::{resolve_output_path, ConflictStrategy};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const TITLE_LEN: usize = 30;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("已有导出正在进行")]
    AlreadyRunning,
    #[error("先选择要导出的视频")]
    NothingSelected,
    #[error("未选择设备")]
    NoDevice,
    #[error("未找到 adb")]
    AdbNotFound,
    #[error("无法创建输出目录 {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    /// 即将处理第 `current` 条（从 1 开始）
    Progress {
        current: usize,
        total: usize,
        message: String,
    },
    Exported { title: String, path: PathBuf },
    Error(String),
    Finished { success: usize, total: usize },
}

/// 单条结果，顺序与输入一致
#[derive(Debug)]
pub struct ExportResult {
    pub title: String,
    pub outcome: Result<PathBuf, ConvertError>,
}

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub videos: Vec<CachedVideo>,
    pub out_dir: PathBuf,
    pub strategy: ConflictStrategy,
}

impl ExportJob {
    pub fn new(videos: Vec<CachedVideo>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            videos,
            out_dir: out_dir.into(),
            strategy: ConflictStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// 用给定的传输方式导出整批，返回每条的结果
pub fn export_with<T: Transport>(
    transport: &T,
    merger: &dyn Merger,
    job: &ExportJob,
    cancel: &AtomicBool,
    emit: &mut dyn FnMut(ExportEvent),
) -> Vec<ExportResult> {
    let total = job.videos.len();
    let mut results = Vec::with_capacity(total);
    let mut success = 0;

    for (index, video) in job.videos.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            info!("导出已取消，已处理 {}/{}", index, total);
            results.extend(job.videos[index..].iter().map(|v| ExportResult {
                title: v.display_title(),
                outcome: Err(ConvertError::Cancelled),
            }));
            break;
        }

        let title = video.display_title();
        let short = truncate_message(&title, TITLE_LEN);
        emit(ExportEvent::Progress {
            current: index + 1,
            total,
            message: format!("转换: {}", short),
        });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| export_one(transport, merger, video, job)))
            .unwrap_or_else(|_| Err(ConvertError::MergeFailed("意外中止".to_string())));
        match &outcome {
            Ok(path) => {
                success += 1;
                info!("已导出: {}", path.display());
                emit(ExportEvent::Exported {
                    title: title.clone(),
                    path: path.clone(),
                });
            }
            Err(ConvertError::Skipped(e)) => {
                info!("{}", e);
                emit(ExportEvent::Error(e.to_string()));
            }
            Err(e) => {
                warn!("转换失败 {}: {}", title, e);
                emit(ExportEvent::Error(format!("转换失败: {}", short)));
            }
        }
        results.push(ExportResult { title, outcome });
    }

    info!(success, total, "导出结束");
    emit(ExportEvent::Finished { success, total });
    results
}

/// 本地存储直接在原目录合并；远端先把两个分段拉到临时目录，用完即删
fn export_one<T: Transport>(
    transport: &T,
    merger: &dyn Merger,
    video: &CachedVideo,
    job: &ExportJob,
) -> Result<PathBuf, ConvertError> {
    let dest = resolve_output_path(&job.out_dir, &video.display_title(), job.strategy)?;
    match transport.kind() {
        TransportKind::LocalFilesystem => merger.combine(&video.folder_path, &dest)?,
        TransportKind::RemoteShell => {
            let staging = tempfile::Builder::new().prefix("biliandout-export-").tempdir()?;
            let segments = [(&video.video_path, VIDEO_SEGMENT), (&video.audio_path, AUDIO_SEGMENT)];
            for (segment, name) in segments {
                let remote = transport.from_record_path(segment);
                if !transport.copy_to_local(&remote, &staging.path().join(name), SEGMENT_TIMEOUT) {
                    return Err(ConvertError::StageFailed(segment.display().to_string()));
                }
            }
            merger.combine(staging.path(), &dest)?;
        }
    }
    Ok(dest)
}

/// 一次导出，创建时完成全部输入校验
#[derive(Debug)]
pub struct ExportSession {
    target: TransportTarget,
    job: ExportJob,
    adb: Option<PathBuf>,
    cancel: Arc<AtomicBool>,
}

impl ExportSession {
    pub fn new(target: TransportTarget, job: ExportJob, adb_path: Option<PathBuf>) -> Result<Self, ExportError> {
        if target.device_id.trim().is_empty() {
            return Err(ExportError::NoDevice);
        }
        if job.videos.is_empty() {
            return Err(ExportError::NothingSelected);
        }
        let adb = match target.kind {
            TransportKind::LocalFilesystem => None,
            TransportKind::RemoteShell => Some(
                adb_path
                    .or_else(|| adb::find_adb().map(PathBuf::from))
                    .ok_or(ExportError::AdbNotFound)?,
            ),
        };
        std::fs::create_dir_all(&job.out_dir).map_err(|source| ExportError::OutputDir {
            path: job.out_dir.clone(),
            source,
        })?;
        Ok(Self {
            target,
            job,
            adb,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(&self, merger: &dyn Merger, emit: &mut dyn FnMut(ExportEvent)) -> Vec<ExportResult> {
        info!(
            "开始导出 {} 个视频到 {}",
            self.job.videos.len(),
            self.job.out_dir.display()
        );
        match &self.adb {
            Some(adb) => {
                let transport = AdbTransport::new(adb, &self.target.device_id, std::env::temp_dir());
                export_with(&transport, merger, &self.job, &self.cancel, emit)
            }
            None => export_with(&LocalTransport::new(), merger, &self.job, &self.cancel, emit),
        }
    }
}

struct RunningExport {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Vec<ExportResult>>,
    events: Receiver<ExportEvent>,
}

/// 持有至多一个后台导出
#[derive(Default)]
pub struct Exporter {
    running: Option<RunningExport>,
    results: Vec<ExportResult>,
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self, session: ExportSession, merger: Arc<dyn Merger>) -> Result<(), ExportError> {
        if let Some(r) = &self.running {
            if !r.handle.is_finished() {
                return Err(ExportError::AlreadyRunning);
            }
            self.teardown();
        }
        self.results.clear();
        let cancel = session.cancel_flag();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            session.run(merger.as_ref(), &mut |event| {
                let _ = tx.send(event);
            })
        });
        self.running = Some(RunningExport {
            cancel,
            handle,
            events: rx,
        });
        Ok(())
    }

    pub fn cancel(&self) {
        if let Some(r) = &self.running {
            r.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// 等待下一个事件；读到 `Finished` 后回收工作线程
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ExportEvent> {
        let received = self.running.as_ref()?.events.recv_timeout(timeout);
        match received {
            Ok(event) => {
                if matches!(event, ExportEvent::Finished { .. }) {
                    self.teardown();
                }
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.teardown();
                None
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(r) = self.running.take() {
            r.cancel.store(true, Ordering::SeqCst);
            match r.handle.join() {
                Ok(results) => self.results = results,
                Err(_) => warn!("导出线程异常退出"),
            }
        }
    }

    pub fn results(&self) -> &[ExportResult] {
        &self.results
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        self.teardown();
    }
}
