// The KEY=INTEGER record of settings captured before disabling.

use super::model::{ENABLED, SETTINGS};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Key under which the execute bits (`mode & 0o111`, as a plain integer)
/// of a run script are kept.
pub fn exec_key(path: &Path) -> String {
    format!("EXEC:{}", path.display())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateRecord {
    values: BTreeMap<String, i64>,
}

impl StateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: i64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }

    /// A setting nobody recorded goes back to enabled.
    pub fn value_or_enabled(&self, key: &str) -> i64 {
        self.get(key).unwrap_or(ENABLED)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn parse(text: &str) -> Self {
        let mut record = Self::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parsed = line
                .split_once('=')
                .and_then(|(k, v)| Some((k.trim(), v.trim().parse::<i64>().ok()?)))
                .filter(|(k, _)| !k.is_empty());

            match parsed {
                Some((key, value)) => record.insert(key, value),
                None => log::warn!("Ignoring malformed state line {}: {:?}", lineno + 1, line),
            }
        }

        record
    }

    /// Known settings first in their fixed order, then anything else sorted.
    pub fn render(&self) -> String {
        let known = SETTINGS.iter().map(|s| s.key);
        let mut out = String::new();

        for key in known.clone() {
            if let Some(value) = self.get(key) {
                out.push_str(&format!("{}={}\n", key, value));
            }
        }
        for (key, value) in &self.values {
            if !known.clone().any(|k| k == key.as_str()) {
                out.push_str(&format!("{}={}\n", key, value));
            }
        }

        out
    }

    /// `None` when no record has been written.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = path.with_extension("state.tmp");
        fs::write(&tmp, self.render())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    /// Returns whether a file was removed.
    pub fn remove(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_skips_noise() {
        let record = StateRecord::parse("# saved\nBLE_SENSORS=0\n\nBLUETOOTH = 1\nJUNK\nX=abc\n=4\n");
        assert_eq!(record.get("BLE_SENSORS"), Some(0));
        assert_eq!(record.get("BLUETOOTH"), Some(1));
        assert_eq!(record.get("JUNK"), None);
        assert_eq!(record.get("X"), None);
        assert_eq!(record.get(""), None);
    }

    #[test]
    fn missing_keys_default_to_enabled() {
        let record = StateRecord::parse("BLUETOOTH=0\n");
        assert_eq!(record.value_or_enabled("BLUETOOTH"), 0);
        assert_eq!(record.value_or_enabled("BLE_SENSORS"), 1);
    }

    #[test]
    fn render_orders_known_keys_first() {
        let mut record = StateRecord::new();
        record.insert("ZZZ", 7);
        record.insert("BLUETOOTH", 0);
        record.insert("BLE_SENSORS", 1);
        assert_eq!(record.render(), "BLE_SENSORS=1\nBLUETOOTH=0\nZZZ=7\n");
    }

    #[test]
    fn exec_keys_survive_a_round_trip() {
        let key = exec_key(Path::new("/opt/victronenergy/vesmart-server/run"));
        assert_eq!(key, "EXEC:/opt/victronenergy/vesmart-server/run");

        let mut record = StateRecord::new();
        record.insert(&key, 0o100);
        record.insert("BLUETOOTH", 1);

        let text = record.render();
        assert_eq!(text, "BLUETOOTH=1\nEXEC:/opt/victronenergy/vesmart-server/run=64\n");
        assert_eq!(StateRecord::parse(&text).get(&key), Some(0o100));
    }

    #[test]
    fn load_save_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/disable-victron-bluetooth.state");

        assert_eq!(StateRecord::load(&path).unwrap(), None);

        let mut record = StateRecord::new();
        record.insert("BLE_SENSORS", 1);
        record.insert("BLUETOOTH", 0);
        record.save(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "BLE_SENSORS=1\nBLUETOOTH=0\n"
        );
        assert_eq!(StateRecord::load(&path).unwrap(), Some(record));
        assert!(!path.with_extension("state.tmp").exists());

        assert!(StateRecord::remove(&path).unwrap());
        assert!(!StateRecord::remove(&path).unwrap());
    }
}
