//! 后台扫描：可暂停、可取消，逐条上报发现的视频
//!
//! 状态：`Idle → Loading ⇄ Paused → Idle`。工作线程通过通道按顺序发送
//! `Progress` / `Found` / `Error`，最后恰好发送一次 `Finished`。

use super::parser::CachedVideo;
use super::walker::{CacheWalker, TopFolder, WalkOptions};
use crate::device::command::truncate_message;
use crate::device::{adb, AdbTransport, LocalTransport, Transport, TransportKind, TransportTarget};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const PAUSE_POLL: Duration = Duration::from_millis(100);
const ERROR_MESSAGE_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("已有扫描正在进行")]
    AlreadyRunning,
    #[error("当前没有进行中的扫描")]
    NotRunning,
    #[error("未选择设备")]
    NoDevice,
    #[error("未知的来源: {0}")]
    UnknownSource(String),
    #[error("未找到 adb")]
    AdbNotFound,
    #[error("无法创建临时目录: {0}")]
    Staging(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// 即将处理第 `current` 个顶层目录（从 1 开始）
    Progress { current: usize, total: usize },
    Found(CachedVideo),
    /// 非致命的诊断信息
    Error(String),
    Finished(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Loading,
    Paused,
}

#[derive(Debug, Default)]
struct ScanFlags {
    cancelled: AtomicBool,
    paused: AtomicBool,
}

/// 协作式的暂停/取消标志，可在线程间共享
#[derive(Debug, Clone, Default)]
pub struct ScanControl(Arc<ScanFlags>);

impl ScanControl {
    /// 取消后不可恢复
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        if !self.is_cancelled() {
            self.0.paused.store(true, Ordering::SeqCst);
        }
    }

    pub fn resume(&self) {
        self.0.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.0.paused.load(Ordering::SeqCst) && !self.is_cancelled()
    }

    fn wait_if_paused(&self) {
        while self.is_paused() {
            thread::sleep(PAUSE_POLL);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub walk: WalkOptions,
    /// 覆盖自动查找的 adb 路径
    pub adb_path: Option<PathBuf>,
    /// 中转目录的父目录，默认系统临时目录
    pub staging_parent: Option<PathBuf>,
}

/// 一次扫描；`run` 在当前线程同步执行
#[derive(Debug)]
pub struct ScanSession {
    target: TransportTarget,
    options: ScanOptions,
    control: ScanControl,
}

impl ScanSession {
    pub fn new(target: TransportTarget, options: ScanOptions) -> Self {
        Self {
            target,
            options,
            control: ScanControl::default(),
        }
    }

    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    /// 执行扫描并返回发现数量；无论成功、取消或出错，最后都会发送 `Finished`
    pub fn run(&self, emit: &mut dyn FnMut(ScanEvent)) -> usize {
        let mut count = 0;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.scan(&mut count, &mut *emit)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("扫描失败: {}", e);
                emit(ScanEvent::Error(truncate_message(
                    &format!("扫描错误: {}", e),
                    ERROR_MESSAGE_LEN,
                )));
            }
            Err(_) => {
                warn!("扫描线程异常终止");
                emit(ScanEvent::Error("扫描错误: 意外中止".to_string()));
            }
        }
        info!(count, cancelled = self.control.is_cancelled(), "扫描结束");
        emit(ScanEvent::Finished(count));
        count
    }

    fn scan(&self, count: &mut usize, emit: &mut dyn FnMut(ScanEvent)) -> Result<(), ScanError> {
        let source = self
            .target
            .source()
            .ok_or_else(|| ScanError::UnknownSource(self.target.source_key.clone()))?;

        // 中转目录随 TempDir 一起删除，包括出错与 panic 的路径
        let mut builder = tempfile::Builder::new();
        builder.prefix("biliandout-scan-");
        let staging = match &self.options.staging_parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        debug!("中转目录: {}", staging.path().display());

        match self.target.kind {
            TransportKind::LocalFilesystem => {
                let root = source.local_download_root(&self.target.storage_root());
                info!("扫描存储设备: {}", root.display());
                if !root.is_dir() {
                    info!("下载目录不存在: {}", root.display());
                    return Ok(());
                }
                self.walk_with(&LocalTransport::new(), root, count, emit);
            }
            TransportKind::RemoteShell => {
                let adb = self
                    .options
                    .adb_path
                    .clone()
                    .or_else(|| adb::find_adb().map(PathBuf::from))
                    .ok_or(ScanError::AdbNotFound)?;
                let transport = AdbTransport::new(adb, &self.target.device_id, staging.path());
                let root = source.remote_download_root();
                info!("扫描 ADB 设备 {}: {}", self.target.device_id, root);
                self.walk_with(&transport, root, count, emit);
            }
        }
        Ok(())
    }

    fn walk_with<T: Transport>(
        &self,
        transport: &T,
        root: T::Location,
        count: &mut usize,
        emit: &mut dyn FnMut(ScanEvent),
    ) {
        let walker = CacheWalker::new(transport, root, self.options.walk.clone());
        let folders: Vec<TopFolder<T::Location>> = walker.top_level_folders();
        let total = folders.len();

        for (index, folder) in folders.iter().enumerate() {
            self.control.wait_if_paused();
            if self.control.is_cancelled() {
                info!("扫描已取消，已处理 {}/{}", index, total);
                break;
            }
            emit(ScanEvent::Progress {
                current: index + 1,
                total,
            });
            walker.walk_folder(folder, &mut |video| {
                *count += 1;
                emit(ScanEvent::Found(video));
            });
        }
    }
}

struct RunningScan {
    control: ScanControl,
    handle: JoinHandle<()>,
    events: Receiver<ScanEvent>,
}

/// 持有至多一个后台扫描，并缓存已发现的视频
#[derive(Default)]
pub struct Scanner {
    running: Option<RunningScan>,
    results: Vec<CachedVideo>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ScanState {
        match &self.running {
            None => ScanState::Idle,
            Some(r) if r.control.is_paused() => ScanState::Paused,
            Some(_) => ScanState::Loading,
        }
    }

    /// 仅在 `Idle` 时有效；开始前清空上一次的结果
    pub fn start(&mut self, target: TransportTarget, options: ScanOptions) -> Result<(), ScanError> {
        if let Some(r) = &self.running {
            if !r.handle.is_finished() {
                return Err(ScanError::AlreadyRunning);
            }
            // 线程已退出但结束事件尚未被读取
            self.teardown();
        }
        if target.device_id.trim().is_empty() {
            return Err(ScanError::NoDevice);
        }
        if target.source().is_none() {
            return Err(ScanError::UnknownSource(target.source_key));
        }

        self.results.clear();
        let session = ScanSession::new(target, options);
        let control = session.control();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            session.run(&mut |event| {
                let _ = tx.send(event);
            });
        });
        self.running = Some(RunningScan {
            control,
            handle,
            events: rx,
        });
        Ok(())
    }

    fn control(&self) -> Result<&ScanControl, ScanError> {
        self.running
            .as_ref()
            .map(|r| &r.control)
            .ok_or(ScanError::NotRunning)
    }

    pub fn pause(&self) -> Result<(), ScanError> {
        self.control()?.pause();
        Ok(())
    }

    pub fn resume(&self) -> Result<(), ScanError> {
        self.control()?.resume();
        Ok(())
    }

    pub fn cancel(&self) -> Result<(), ScanError> {
        self.control()?.cancel();
        Ok(())
    }

    /// 等待下一个事件；读到 `Finished` 后回收工作线程并回到 `Idle`
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ScanEvent> {
        let received = self.running.as_ref()?.events.recv_timeout(timeout);
        match received {
            Ok(event) => Some(self.observe(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.teardown();
                None
            }
        }
    }

    /// 取出当前所有待处理事件，不阻塞
    pub fn poll(&mut self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Some(r) = &self.running {
            match r.events.try_recv() {
                Ok(event) => events.push(self.observe(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.teardown(),
            }
        }
        events
    }

    fn observe(&mut self, event: ScanEvent) -> ScanEvent {
        match &event {
            ScanEvent::Found(video) => self.results.push(video.clone()),
            ScanEvent::Finished(_) => self.teardown(),
            _ => {}
        }
        event
    }

    /// 取消并等待工作线程退出，剩余事件中的结果仍会保留
    fn teardown(&mut self) {
        if let Some(r) = self.running.take() {
            r.control.cancel();
            if r.handle.join().is_err() {
                warn!("扫描线程异常退出");
            }
            for event in r.events.try_iter() {
                if let ScanEvent::Found(video) = event {
                    self.results.push(video);
                }
            }
        }
    }

    pub fn results(&self) -> &[CachedVideo] {
        &self.results
    }

    /// 切换设备时清空
    pub fn clear_results(&mut self) {
        self.results.clear();
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// 在 `storage` 下建立 `folders` 个顶层目录，每个含 `pairs` 对分段
    fn build_storage(storage: &Path, folders: usize, pairs: usize) {
        let root = storage.join("Android/data/tv.danmaku.bili/download");
        for f in 0..folders {
            for p in 0..pairs {
                let leaf = root.join(format!("{:03}", f)).join(format!("c_{}", p)).join("80");
                fs::create_dir_all(&leaf).unwrap();
                fs::write(leaf.join("video.m4s"), b"v").unwrap();
                fs::write(leaf.join("audio.m4s"), b"a").unwrap();
            }
        }
    }

    fn options(tmp: &TempDir) -> ScanOptions {
        let staging = tmp.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        ScanOptions {
            walk: WalkOptions {
                cover_cache: tmp.path().join("covers"),
                ..WalkOptions::default()
            },
            adb_path: None,
            staging_parent: Some(staging),
        }
    }

    fn local_target(storage: &Path) -> TransportTarget {
        TransportTarget::new(
            storage.to_string_lossy(),
            TransportKind::LocalFilesystem,
            "default",
        )
    }

    #[test]
    fn test_session_emits_in_order() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("phone");
        build_storage(&storage, 2, 2);

        let session = ScanSession::new(local_target(&storage), options(&tmp));
        let mut events = Vec::new();
        let count = session.run(&mut |e| events.push(e));
        assert_eq!(count, 4);

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                ScanEvent::Progress { .. } => "progress",
                ScanEvent::Found(_) => "found",
                ScanEvent::Error(_) => "error",
                ScanEvent::Finished(_) => "finished",
            })
            .collect();
        assert_eq!(
            kinds,
            ["progress", "found", "found", "progress", "found", "found", "finished"]
        );
        assert_eq!(events[0], ScanEvent::Progress { current: 1, total: 2 });
        assert_eq!(events[3], ScanEvent::Progress { current: 2, total: 2 });
        assert_eq!(events.last(), Some(&ScanEvent::Finished(4)));
    }

    #[test]
    fn test_cancel_after_third_folder() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("phone");
        build_storage(&storage, 10, 2);
        let opts = options(&tmp);
        let staging_parent = opts.staging_parent.clone().unwrap();

        let session = ScanSession::new(local_target(&storage), opts);
        let control = session.control();
        let mut events = Vec::new();
        let count = session.run(&mut |e| {
            if let ScanEvent::Progress { current: 3, .. } = e {
                control.cancel();
            }
            events.push(e);
        });

        assert_eq!(count, 6);
        assert_eq!(events.last(), Some(&ScanEvent::Finished(6)));
        let progress = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 3);
        assert_eq!(fs::read_dir(&staging_parent).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_download_root_is_empty_result() {
        let tmp = TempDir::new().unwrap();
        let session = ScanSession::new(local_target(&tmp.path().join("nothing")), options(&tmp));
        let mut events = Vec::new();
        assert_eq!(session.run(&mut |e| events.push(e)), 0);
        assert_eq!(events, vec![ScanEvent::Finished(0)]);
    }

    #[test]
    fn test_unknown_source_reports_error_then_finishes() {
        let tmp = TempDir::new().unwrap();
        let target = TransportTarget::new("x", TransportKind::LocalFilesystem, "intl");
        let session = ScanSession::new(target, options(&tmp));
        let mut events = Vec::new();
        session.run(&mut |e| events.push(e));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ScanEvent::Error(_)));
        assert_eq!(events[1], ScanEvent::Finished(0));
    }

    #[test]
    fn test_pause_holds_at_folder_boundary() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("phone");
        build_storage(&storage, 3, 1);

        let session = ScanSession::new(local_target(&storage), options(&tmp));
        let control = session.control();
        let pauser = session.control();
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            session.run(&mut |e| {
                if let ScanEvent::Progress { current: 1, .. } = e {
                    pauser.pause();
                }
                let _ = tx.send(e);
            })
        });

        let wait = Duration::from_secs(10);
        assert_eq!(rx.recv_timeout(wait).unwrap(), ScanEvent::Progress { current: 1, total: 3 });
        // 已开始的目录照常完成，随后停在下一个目录之前
        assert!(matches!(rx.recv_timeout(wait).unwrap(), ScanEvent::Found(_)));
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        assert!(control.is_paused());

        control.resume();
        assert_eq!(rx.recv_timeout(wait).unwrap(), ScanEvent::Progress { current: 2, total: 3 });
        assert_eq!(worker.join().unwrap(), 3);
        let rest: Vec<ScanEvent> = rx.try_iter().collect();
        assert_eq!(rest.last(), Some(&ScanEvent::Finished(3)));
    }

    #[test]
    fn test_control_flags() {
        let c = ScanControl::default();
        c.pause();
        assert!(c.is_paused());
        c.resume();
        assert!(!c.is_paused());
        c.pause();
        c.cancel();
        assert!(c.is_cancelled());
        assert!(!c.is_paused());
        c.pause();
        assert!(!c.is_paused());
    }

    #[test]
    fn test_scanner_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("phone");
        build_storage(&storage, 3, 1);

        let mut scanner = Scanner::new();
        assert_eq!(scanner.state(), ScanState::Idle);
        assert!(matches!(scanner.pause(), Err(ScanError::NotRunning)));

        scanner.start(local_target(&storage), options(&tmp)).unwrap();
        assert_ne!(scanner.state(), ScanState::Idle);

        let mut finished = None;
        while finished.is_none() {
            match scanner.recv_timeout(Duration::from_secs(10)) {
                Some(ScanEvent::Finished(n)) => finished = Some(n),
                Some(_) => {}
                None => panic!("扫描未结束"),
            }
        }
        assert_eq!(finished, Some(3));
        assert_eq!(scanner.state(), ScanState::Idle);
        assert_eq!(scanner.results().len(), 3);

        // 新扫描清空旧结果
        scanner.start(local_target(&tmp.path().join("empty")), options(&tmp)).unwrap();
        while scanner.state() != ScanState::Idle {
            scanner.recv_timeout(Duration::from_secs(10));
        }
        assert!(scanner.results().is_empty());
    }

    /// 用一个会卡住的假 adb 让扫描停留在列目录阶段
    #[cfg(unix)]
    #[test]
    fn test_scanner_pause_and_cancel() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let fake_adb = tmp.path().join("adb");
        fs::write(&fake_adb, "#!/bin/sh\nsleep 1\n").unwrap();
        fs::set_permissions(&fake_adb, fs::Permissions::from_mode(0o755)).unwrap();
        let opts = ScanOptions {
            adb_path: Some(fake_adb),
            ..options(&tmp)
        };
        let target = TransportTarget::new("serial", TransportKind::RemoteShell, "default");

        let mut scanner = Scanner::new();
        scanner.start(target.clone(), opts.clone()).unwrap();
        assert_eq!(scanner.state(), ScanState::Loading);
        scanner.pause().unwrap();
        assert_eq!(scanner.state(), ScanState::Paused);
        assert!(matches!(
            scanner.start(target, opts),
            Err(ScanError::AlreadyRunning)
        ));
        scanner.resume().unwrap();
        assert_eq!(scanner.state(), ScanState::Loading);
        scanner.cancel().unwrap();

        let mut last = None;
        while scanner.state() != ScanState::Idle {
            if let Some(e) = scanner.recv_timeout(Duration::from_secs(10)) {
                last = Some(e);
            }
        }
        assert_eq!(last, Some(ScanEvent::Finished(0)));
        assert!(scanner.results().is_empty());
    }

    #[test]
    fn test_scanner_rejects_bad_input() {
        let mut scanner = Scanner::new();
        let t = TransportTarget::new(" ", TransportKind::RemoteShell, "default");
        assert!(matches!(scanner.start(t, ScanOptions::default()), Err(ScanError::NoDevice)));
        let t = TransportTarget::new("serial", TransportKind::RemoteShell, "nope");
        assert!(matches!(
            scanner.start(t, ScanOptions::default()),
            Err(ScanError::UnknownSource(_))
        ));
        assert_eq!(scanner.state(), ScanState::Idle);
    }
}
