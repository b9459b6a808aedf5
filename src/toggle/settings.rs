// Reads and writes Venus settings over the system D-Bus.

use anyhow::{Context, Result};
use zbus::blocking::Connection;
use zbus::proxy::CacheProperties;
use zbus::zvariant::{OwnedValue, Value};

/// Integer settings exposed by the localsettings daemon.
pub trait SettingsBus {
    fn get(&self, path: &str) -> Result<i64>;
    fn set(&self, path: &str, value: i64) -> Result<()>;
}

/// One setting object of `com.victronenergy.settings`. The object path is
/// the setting path, so it is given per proxy.
#[zbus::proxy(
    interface = "com.victronenergy.BusItem",
    default_service = "com.victronenergy.settings",
    gen_async = false
)]
trait BusItem {
    fn get_value(&self) -> zbus::Result<OwnedValue>;

    /// Returns 0 when localsettings accepted the value.
    fn set_value(&self, value: &Value<'_>) -> zbus::Result<i32>;
}

pub struct VenusSettings {
    conn: Option<Connection>,
}

impl VenusSettings {
    /// An unreachable bus is not fatal here: every call then fails and the
    /// controller warns about it.
    pub fn connect() -> Self {
        let conn = match Connection::system() {
            Ok(conn) => Some(conn),
            Err(e) => {
                log::warn!("Could not connect to the system bus: {}", e);
                None
            }
        };
        Self { conn }
    }

    fn item<'p>(&'p self, path: &'p str) -> Result<BusItemProxy<'p>> {
        let conn = self.conn.as_ref().context("system bus not connected")?;
        BusItemProxy::builder(conn)
            .path(path)?
            .cache_properties(CacheProperties::No)
            .build()
            .with_context(|| format!("Failed to create proxy for {}", path))
    }
}

impl SettingsBus for VenusSettings {
    fn get(&self, path: &str) -> Result<i64> {
        let value = self
            .item(path)?
            .get_value()
            .with_context(|| format!("GetValue on {} failed", path))?;
        integer(&value).with_context(|| format!("Unexpected value for {}", path))
    }

    fn set(&self, path: &str, value: i64) -> Result<()> {
        let value = i32::try_from(value)
            .with_context(|| format!("{} does not fit a setting", value))?;
        let rc = self
            .item(path)?
            .set_value(&Value::I32(value))
            .with_context(|| format!("SetValue on {} failed", path))?;

        if rc != 0 {
            anyhow::bail!("SetValue on {} was refused ({})", path, rc);
        }
        Ok(())
    }
}

/// Integer settings come back as any of the integer variant types, and
/// some older settings as whole doubles.
pub fn integer(value: &Value<'_>) -> Result<i64> {
    match value {
        Value::U8(v) => Ok(i64::from(*v)),
        Value::I16(v) => Ok(i64::from(*v)),
        Value::U16(v) => Ok(i64::from(*v)),
        Value::I32(v) => Ok(i64::from(*v)),
        Value::U32(v) => Ok(i64::from(*v)),
        Value::I64(v) => Ok(*v),
        Value::U64(v) => i64::try_from(*v).with_context(|| format!("{} out of range", v)),
        Value::F64(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(*v as i64),
        Value::Value(inner) => integer(inner),
        other => Err(anyhow::anyhow!("not an integer: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_variants() {
        assert_eq!(integer(&Value::I32(1)).unwrap(), 1);
        assert_eq!(integer(&Value::U8(0)).unwrap(), 0);
        assert_eq!(integer(&Value::I64(-3)).unwrap(), -3);
        assert_eq!(integer(&Value::Value(Box::new(Value::U32(7)))).unwrap(), 7);
    }

    #[test]
    fn whole_doubles_only() {
        assert_eq!(integer(&Value::F64(1.0)).unwrap(), 1);
        assert!(integer(&Value::F64(0.5)).is_err());
        assert!(integer(&Value::F64(f64::NAN)).is_err());
    }

    #[test]
    fn rejects_non_integers() {
        assert!(integer(&Value::from("on")).is_err());
        assert!(integer(&Value::Bool(true)).is_err());
        assert!(integer(&Value::U64(u64::MAX)).is_err());
    }
}
