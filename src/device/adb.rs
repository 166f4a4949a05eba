//! 通过 adb 访问设备端缓存

use super::command::{hidden_command, run_with_timeout, CommandError, CommandOutput};
use super::source::TransportKind;
use super::transport::{parse_json_object, DirEntry, EntryKind, Transport, SIDECAR_TIMEOUT};
use super::{Device, DeviceKind};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 下载根目录可能很大，单独放宽
const ROOT_LIST_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEVICES_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_MODEL: &str = "Android设备";

#[cfg(target_os = "windows")]
const ADB_NAME: &str = "adb.exe";
#[cfg(not(target_os = "windows"))]
const ADB_NAME: &str = "adb";

static ADB_PATH: OnceCell<Option<PathBuf>> = OnceCell::new();

/// 查找 adb：先试 PATH，再试常见 SDK 安装位置。结果在进程内缓存
pub fn find_adb() -> Option<&'static Path> {
    ADB_PATH.get_or_init(probe_adb).as_deref()
}

/// 配置中的路径优先
pub fn resolve_adb(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = configured {
        let path = Path::new(p);
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        debug!("配置的 adb 路径不存在: {}", p);
    }
    find_adb().map(Path::to_path_buf)
}

fn probe_adb() -> Option<PathBuf> {
    let mut cmd = hidden_command(ADB_NAME);
    cmd.arg("version");
    if let Ok(out) = run_with_timeout(cmd, PROBE_TIMEOUT) {
        if out.success() {
            return Some(PathBuf::from(ADB_NAME));
        }
    }
    let found = sdk_locations().into_iter().find(|p| p.is_file());
    if found.is_none() {
        debug!("未找到 adb");
    }
    found
}

fn sdk_locations() -> Vec<PathBuf> {
    let tools = |base: PathBuf| base.join("platform-tools").join(ADB_NAME);
    let mut paths = Vec::new();
    #[cfg(target_os = "windows")]
    {
        if let Some(local) = dirs::data_local_dir() {
            paths.push(tools(local.join("Android").join("Sdk")));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(tools(home.join("AppData").join("Local").join("Android").join("Sdk")));
        }
        paths.push(tools(PathBuf::from(r"C:\Android\sdk")));
        paths.push(tools(PathBuf::from(r"C:\Program Files\Android")));
        paths.push(tools(PathBuf::from(r"C:\Program Files (x86)\Android")));
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home) = dirs::home_dir() {
            paths.push(tools(home.join("Android").join("Sdk")));
            paths.push(tools(home.join("Library").join("Android").join("sdk")));
        }
        paths.push(tools(PathBuf::from("/opt/android-sdk")));
    }
    paths
}

/// 列出处于 `device` 状态的设备
pub fn list_devices(adb: &Path) -> Vec<Device> {
    let mut cmd = hidden_command(adb);
    cmd.args(["devices", "-l"]);
    match run_with_timeout(cmd, DEVICES_TIMEOUT) {
        Ok(out) if out.success() => parse_devices_output(&out.stdout),
        Ok(out) => {
            debug!("adb devices 退出码异常: {}", out.stderr.trim());
            Vec::new()
        }
        Err(e) => {
            debug!("获取 ADB 设备失败: {}", e);
            Vec::new()
        }
    }
}

/// 解析 `adb devices -l` 输出（首行为标题）
pub fn parse_devices_output(stdout: &str) -> Vec<Device> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            if parts.next()? != "device" {
                return None;
            }
            let model = parts
                .find_map(|p| p.strip_prefix("model:"))
                .map(|m| m.replace('_', " "))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());
            Some(Device {
                id: serial.to_string(),
                name: format!("{} ({})", model, serial),
                kind: DeviceKind::Adb,
            })
        })
        .collect()
}

/// 单引号包裹，交给设备端 sh 解析
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb: PathBuf,
    serial: String,
    /// 读取 sidecar 时的本地中转目录
    staging: PathBuf,
}

impl AdbTransport {
    pub fn new(adb: impl Into<PathBuf>, serial: impl Into<String>, staging: impl Into<PathBuf>) -> Self {
        Self {
            adb: adb.into(),
            serial: serial.into(),
            staging: staging.into(),
        }
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        let mut cmd = hidden_command(&self.adb);
        cmd.arg("-s").arg(&self.serial).args(args);
        run_with_timeout(cmd, timeout)
    }

    fn shell(&self, script: &str, timeout: Duration) -> Option<CommandOutput> {
        match self.run(&["shell", script], timeout) {
            Ok(out) => Some(out),
            Err(e) => {
                debug!("adb shell 失败 `{}`: {}", script, e);
                None
            }
        }
    }

    fn list_with_timeout(&self, dir: &String, timeout: Duration) -> Vec<DirEntry> {
        let Some(out) = self.shell(&format!("ls -1 {}", shell_quote(dir)), timeout) else {
            return Vec::new();
        };
        if !out.success() {
            return Vec::new();
        }
        parse_listing(dir, &out.stdout)
    }
}

/// `ls -1` 作用于文件时只输出该文件路径本身
fn parse_listing(dir: &str, stdout: &str) -> Vec<DirEntry> {
    let names: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "." && *l != "..")
        .collect();
    if names.len() == 1 && names[0] == dir {
        return Vec::new();
    }
    names
        .into_iter()
        .map(|n| DirEntry::new(n, EntryKind::Unknown))
        .collect()
}

fn parse_sizes(stdout: &str, expected: usize) -> Vec<u64> {
    let sizes: Vec<u64> = stdout
        .lines()
        .filter_map(|l| l.trim().parse::<u64>().ok())
        .collect();
    if sizes.len() == expected {
        sizes
    } else {
        vec![0; expected]
    }
}

impl Transport for AdbTransport {
    type Location = String;

    fn kind(&self) -> TransportKind {
        TransportKind::RemoteShell
    }

    fn join(&self, dir: &String, name: &str) -> String {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }

    fn parent(&self, loc: &String) -> Option<String> {
        loc.rsplit_once('/')
            .map(|(p, _)| p.to_string())
            .filter(|p| !p.is_empty())
    }

    fn file_name(&self, loc: &String) -> Option<String> {
        loc.rsplit('/').next().filter(|n| !n.is_empty()).map(str::to_string)
    }

    fn to_record_path(&self, loc: &String) -> PathBuf {
        PathBuf::from(loc)
    }

    fn from_record_path(&self, path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    fn list_dir(&self, dir: &String) -> Vec<DirEntry> {
        self.list_with_timeout(dir, LIST_TIMEOUT)
    }

    fn list_root(&self, dir: &String) -> Vec<DirEntry> {
        self.list_with_timeout(dir, ROOT_LIST_TIMEOUT)
    }

    /// 拉到中转目录解析后立即删除
    fn read_json(&self, file: &String) -> Option<Value> {
        let name = self.file_name(file).unwrap_or_else(|| "sidecar.json".to_string());
        let local = self.staging.join(name);
        if !self.copy_to_local(file, &local, SIDECAR_TIMEOUT) {
            return None;
        }
        let value = match std::fs::read(&local) {
            Ok(bytes) => Some(parse_json_object(&bytes)),
            Err(e) => {
                debug!("读取中转文件失败 {}: {}", local.display(), e);
                None
            }
        };
        let _ = std::fs::remove_file(&local);
        value
    }

    /// 一次 `stat` 调用查询全部文件
    fn file_sizes(&self, files: &[String]) -> Vec<u64> {
        if files.is_empty() {
            return Vec::new();
        }
        let quoted: Vec<String> = files.iter().map(|f| shell_quote(f)).collect();
        match self.shell(&format!("stat -c %s {}", quoted.join(" ")), LIST_TIMEOUT) {
            Some(out) if out.success() => parse_sizes(&out.stdout, files.len()),
            _ => vec![0; files.len()],
        }
    }

    fn copy_to_local(&self, file: &String, dest: &Path, timeout: Duration) -> bool {
        let dest_str = dest.to_string_lossy();
        let ok = match self.run(&["pull", file.as_str(), dest_str.as_ref()], timeout) {
            Ok(out) => out.success() && dest.is_file(),
            Err(e) => {
                debug!("adb pull 失败 {}: {}", file, e);
                false
            }
        };
        if !ok {
            let _ = std::fs::remove_file(dest);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices_output() {
        let out = "List of devices attached\n\
                   R58M123ABC device usb:1-1 product:beyond1 model:SM_G973F device:beyond1\n\
                   emulator-5554 offline\n\
                   0123456789 unauthorized usb:1-2\n\
                   abcdef device\n\n";
        let devices = parse_devices_output(out);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "R58M123ABC");
        assert_eq!(devices[0].name, "SM G973F (R58M123ABC)");
        assert_eq!(devices[0].kind, DeviceKind::Adb);
        assert_eq!(devices[1].name, "Android设备 (abcdef)");
    }

    #[test]
    fn test_parse_listing() {
        let entries = parse_listing("/sdcard/x", "123\n456\n\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "123");
        assert!(parse_listing("/sdcard/x/entry.json", "/sdcard/x/entry.json\n").is_empty());
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!(parse_sizes("100\n200\n", 2), vec![100, 200]);
        assert_eq!(parse_sizes("100\n", 2), vec![0, 0]);
        assert_eq!(parse_sizes("stat: x: No such file\n", 1), vec![0]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/sdcard/a b"), "'/sdcard/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_remote_paths() {
        let t = AdbTransport::new("adb", "serial", "/tmp");
        let dir = "/sdcard/Android/data/tv.danmaku.bili/download".to_string();
        let child = t.join(&dir, "123");
        assert_eq!(child, format!("{}/123", dir));
        assert_eq!(t.parent(&child), Some(dir.clone()));
        assert_eq!(t.file_name(&child).as_deref(), Some("123"));
        assert_eq!(t.parent(&"/sdcard".to_string()), None);
        assert_eq!(t.from_record_path(&t.to_record_path(&child)), child);
    }
}
