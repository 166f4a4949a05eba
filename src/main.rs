use anyhow::{bail, Context, Result};
use biliandout::cache::{ScanEvent, ScanOptions, ScanState, Scanner, WalkOptions};
use biliandout::config::{load_config, resolve_ffmpeg_path, resolve_mp4box_path, AppConfig};
use biliandout::convert::{ExportEvent, ExportJob, ExportSession, Exporter, Mp4BoxMerger};
use biliandout::device::{adb, connected_devices, find_source, TransportKind, TransportTarget, BILI_SOURCES};
use biliandout::filemgr::ConflictStrategy;
use biliandout::{logging, CachedVideo};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const EVENT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "biliandout")]
#[command(about = "导出安卓哔哩哔哩客户端的离线缓存", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 列出已连接的 adb 设备与存储设备
    Devices,
    /// 扫描设备上的缓存；运行中输入 p 暂停、r 继续、c 取消
    Scan {
        #[command(flatten)]
        target: TargetArgs,
        /// 结束后以 JSON 输出全部结果
        #[arg(long)]
        json: bool,
    },
    /// 扫描后导出为 MP4；运行中输入 c 取消
    Export {
        #[command(flatten)]
        target: TargetArgs,
        /// 输出目录，默认取配置
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 要导出的序号（从 1 开始，逗号分隔），省略则全部导出
        #[arg(short, long, value_delimiter = ',')]
        select: Vec<usize>,
        /// 已存在同名文件时跳过而不是重命名
        #[arg(long)]
        skip_existing: bool,
    },
}

#[derive(Debug, clap::Args)]
struct TargetArgs {
    /// adb 序列号或存储根目录；省略时使用第一个已连接设备
    #[arg(short, long)]
    device: Option<String>,
    /// 把 --device 视为已挂载的存储根目录
    #[arg(long)]
    drive: bool,
    /// 客户端来源：default | concept
    #[arg(long)]
    source: Option<String>,
}

fn main() -> Result<()> {
    logging::init_logger();
    let config = load_config();
    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => run_devices(&config),
        Commands::Scan { target, json } => {
            let adb = adb::resolve_adb(config.adb_path.as_deref());
            let target = resolve_target(&config, &target, adb.as_deref())?;
            let controls = spawn_stdin_reader();
            let videos = run_scan(&config, target, adb, Some(&controls))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&videos)?);
            }
            Ok(())
        }
        Commands::Export {
            target,
            output,
            select,
            skip_existing,
        } => run_export(&config, &target, output, &select, skip_existing),
    }
}

fn run_devices(config: &AppConfig) -> Result<()> {
    let adb = adb::resolve_adb(config.adb_path.as_deref());
    if adb.is_none() {
        warn!("未找到 adb，仅列出存储设备");
    }
    let devices = connected_devices(adb.as_deref());
    if devices.is_empty() {
        println!("未发现设备");
    }
    for d in devices {
        let kind = match d.kind {
            biliandout::DeviceKind::Adb => "adb",
            biliandout::DeviceKind::Drive => "drive",
        };
        println!("{:<6} {:<24} {}", kind, d.id, d.name);
    }
    println!();
    for s in BILI_SOURCES.iter() {
        println!("来源 {:<8} {} ({})", s.key, s.name, s.package);
    }
    Ok(())
}

fn resolve_target(config: &AppConfig, args: &TargetArgs, adb: Option<&std::path::Path>) -> Result<TransportTarget> {
    let source_key = args.source.as_deref().unwrap_or_else(|| config.source_key());
    if find_source(source_key).is_none() {
        bail!("未知的来源: {}", source_key);
    }
    match &args.device {
        Some(id) => {
            let kind = if args.drive {
                TransportKind::LocalFilesystem
            } else {
                TransportKind::RemoteShell
            };
            Ok(TransportTarget::new(id.clone(), kind, source_key))
        }
        None => {
            let device = connected_devices(adb)
                .into_iter()
                .next()
                .context("未发现设备，请连接手机或使用 --device 指定")?;
            info!("使用设备: {}", device.name);
            Ok(device.target(source_key))
        }
    }
}

fn run_scan(
    config: &AppConfig,
    target: TransportTarget,
    adb: Option<PathBuf>,
    controls: Option<&Receiver<String>>,
) -> Result<Vec<CachedVideo>> {
    let options = ScanOptions {
        walk: WalkOptions {
            sidecar_depth: config.sidecar_search_depth(),
            ..WalkOptions::default()
        },
        adb_path: adb,
        staging_parent: None,
    };

    let mut scanner = Scanner::new();
    scanner.start(target, options)?;
    if controls.is_some() {
        eprintln!("输入 p 暂停，r 继续，c 取消");
    }

    loop {
        if let Some(rx) = controls {
            for line in rx.try_iter() {
                let result = match line.trim() {
                    "p" => scanner.pause(),
                    "r" => scanner.resume(),
                    "c" => scanner.cancel(),
                    _ => Ok(()),
                };
                if let Err(e) = result {
                    warn!("{}", e);
                }
                eprintln!("状态: {:?}", scanner.state());
            }
        }
        match scanner.recv_timeout(EVENT_POLL) {
            Some(ScanEvent::Progress { current, total }) => eprintln!("扫描中 {}/{}", current, total),
            Some(ScanEvent::Found(video)) => {
                println!(
                    "[{}] {} | {} | {}",
                    scanner.results().len(),
                    video.display_title(),
                    video.size_display(),
                    video.tech_info()
                );
            }
            Some(ScanEvent::Error(msg)) => eprintln!("{}", msg),
            Some(ScanEvent::Finished(count)) => {
                eprintln!("扫描完成，共 {} 个视频", count);
                break;
            }
            None if scanner.state() == ScanState::Idle => break,
            None => {}
        }
    }
    Ok(scanner.results().to_vec())
}

fn run_export(
    config: &AppConfig,
    args: &TargetArgs,
    output: Option<PathBuf>,
    select: &[usize],
    skip_existing: bool,
) -> Result<()> {
    // 扫描与导出使用同一个设备
    let adb = adb::resolve_adb(config.adb_path.as_deref());
    let target = resolve_target(config, args, adb.as_deref())?;
    let controls = spawn_stdin_reader();
    let videos = run_scan(config, target.clone(), adb.clone(), None)?;
    let chosen: Vec<CachedVideo> = if select.is_empty() {
        videos
    } else {
        select
            .iter()
            .map(|&i| {
                i.checked_sub(1)
                    .and_then(|i| videos.get(i))
                    .cloned()
                    .with_context(|| format!("序号超出范围: {}", i))
            })
            .collect::<Result<_>>()?
    };

    let strategy = if skip_existing {
        ConflictStrategy::Skip
    } else {
        config.conflict_strategy()
    };
    let out_dir = output.unwrap_or_else(|| config.output_dir());
    let job = ExportJob::new(chosen, &out_dir).with_strategy(strategy);
    let session = ExportSession::new(target, job, adb)?;
    let merger = Mp4BoxMerger::new(resolve_mp4box_path(config), resolve_ffmpeg_path(config));

    let mut exporter = Exporter::new();
    exporter.start(session, Arc::new(merger))?;
    eprintln!("输入 c 取消");
    loop {
        if controls.try_iter().any(|line| line.trim() == "c") {
            exporter.cancel();
            eprintln!("正在取消，当前视频完成后停止");
        }
        match exporter.recv_timeout(EVENT_POLL) {
            Some(ExportEvent::Progress { current, total, message }) => {
                eprintln!("{}/{} {}", current, total, message)
            }
            Some(ExportEvent::Exported { path, .. }) => println!("{}", path.display()),
            Some(ExportEvent::Error(msg)) => eprintln!("{}", msg),
            Some(ExportEvent::Finished { success, total }) => {
                eprintln!("导出完成\n成功: {} / {}\n输出目录: {}", success, total, out_dir.display());
                break;
            }
            None if !exporter.is_running() => break,
            None => {}
        }
    }
    Ok(())
}

/// 后台逐行读取 stdin 作为控制命令
fn spawn_stdin_reader() -> Receiver<String> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
}

fn spawn_line_reader<R: BufRead + Send + 'static>(reader: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}
