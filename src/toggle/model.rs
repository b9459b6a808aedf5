// Defines the services, settings and on-device paths the toggle works on.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Overrides the filesystem prefix, for trying the tool on a copy of an image.
pub const ROOT_ENV: &str = "DVB_ROOT";
/// Overrides where the saved settings go.
pub const STATE_FILE_ENV: &str = "DVB_STATE_FILE";

/// Services that fight third-party BLE clients for the adapter.
pub const SERVICES: [&str; 2] = ["dbus-ble-sensors", "vesmart-server"];

/// Value a setting is restored to when no record of it was kept.
pub const ENABLED: i64 = 1;
pub const DISABLED: i64 = 0;

/// Which way the controller is going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Disable,
    Restore,
}

/// A persisted integer setting on the Venus settings bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    /// Key used in the state file.
    pub key: &'static str,
    /// Object path under com.victronenergy.settings.
    pub bus_path: &'static str,
}

pub const SETTINGS: [Setting; 2] = [
    Setting {
        key: "BLE_SENSORS",
        bus_path: "/Settings/Services/BleSensors",
    },
    Setting {
        key: "BLUETOOTH",
        bus_path: "/Settings/Services/Bluetooth",
    },
];

/// Where things live on the device. Every path hangs off `root` so a
/// scratch directory can stand in for `/`.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
    pub state_file: PathBuf,
}

impl Layout {
    pub fn venus() -> Self {
        Self::with_root("/")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_file = root.join("data/disable-victron-bluetooth.state");
        Self { root, state_file }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let mut layout = match lookup(ROOT_ENV) {
            Some(root) if !root.is_empty() => Self::with_root(root),
            _ => Self::venus(),
        };
        if let Some(path) = lookup(STATE_FILE_ENV).filter(|p| !p.is_empty()) {
            layout.state_file = path.into();
        }
        layout
    }

    /// Present on every Venus OS image.
    pub fn os_signature(&self) -> PathBuf {
        self.root.join("opt/victronenergy/version")
    }

    /// Mount point that has to be writable while scripts are chmod'ed.
    pub fn rootfs(&self) -> &Path {
        &self.root
    }

    pub fn service(&self, name: &str) -> Service {
        let opt = self.root.join("opt/victronenergy");
        Service {
            name: name.to_string(),
            link: self.root.join("service").join(name),
            source_dir: opt.join("service").join(name),
            run_scripts: vec![
                opt.join("service").join(name).join("run"),
                opt.join(name).join("run"),
            ],
        }
    }

    pub fn services(&self) -> Vec<Service> {
        SERVICES.iter().map(|name| self.service(name)).collect()
    }
}

/// A vendor service under daemontools supervision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    /// `/service/<name>`, the link svscan watches.
    pub link: PathBuf,
    /// Directory the link points at when supervised.
    pub source_dir: PathBuf,
    /// Candidate run scripts; missing ones are ignored.
    pub run_scripts: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venus_paths() {
        let layout = Layout::venus();
        assert_eq!(
            layout.state_file,
            PathBuf::from("/data/disable-victron-bluetooth.state")
        );
        assert_eq!(
            layout.os_signature(),
            PathBuf::from("/opt/victronenergy/version")
        );

        let svc = layout.service("vesmart-server");
        assert_eq!(svc.link, PathBuf::from("/service/vesmart-server"));
        assert_eq!(
            svc.source_dir,
            PathBuf::from("/opt/victronenergy/service/vesmart-server")
        );
        assert_eq!(
            svc.run_scripts,
            vec![
                PathBuf::from("/opt/victronenergy/service/vesmart-server/run"),
                PathBuf::from("/opt/victronenergy/vesmart-server/run"),
            ]
        );
    }

    #[test]
    fn env_overrides() {
        let layout = Layout::from_lookup(|key| match key {
            ROOT_ENV => Some("/mnt/image".into()),
            _ => None,
        });
        assert_eq!(layout.root, PathBuf::from("/mnt/image"));
        assert_eq!(
            layout.state_file,
            PathBuf::from("/mnt/image/data/disable-victron-bluetooth.state")
        );

        let layout = Layout::from_lookup(|key| match key {
            STATE_FILE_ENV => Some("/tmp/dvb.state".into()),
            _ => Some("".into()),
        });
        assert_eq!(layout.root, PathBuf::from("/"));
        assert_eq!(layout.state_file, PathBuf::from("/tmp/dvb.state"));
    }

    #[test]
    fn services_keep_order() {
        let names: Vec<_> = Layout::venus()
            .services()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["dbus-ble-sensors", "vesmart-server"]);
    }
}
