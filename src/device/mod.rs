//! 设备发现与缓存访问

pub mod adb;
pub mod command;
pub mod drives;
pub mod local;
pub mod source;
pub mod transport;

pub use adb::{find_adb, AdbTransport};
pub use local::LocalTransport;
pub use source::{find_source, BiliSource, TransportKind, TransportTarget, BILI_SOURCES};
pub use transport::{DirEntry, EntryKind, Transport};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Adb,
    Drive,
}

impl From<DeviceKind> for TransportKind {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Adb => TransportKind::RemoteShell,
            DeviceKind::Drive => TransportKind::LocalFilesystem,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// adb 序列号或存储根目录
    pub id: String,
    /// 界面显示名称
    pub name: String,
    pub kind: DeviceKind,
}

impl Device {
    pub fn target(&self, source_key: &str) -> TransportTarget {
        TransportTarget::new(self.id.clone(), self.kind.into(), source_key)
    }
}

/// adb 设备在前，存储设备在后
pub fn connected_devices(adb: Option<&std::path::Path>) -> Vec<Device> {
    let mut devices = adb.map(adb::list_devices).unwrap_or_default();
    devices.extend(drives::drive_devices());
    devices
}
