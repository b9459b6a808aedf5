//! Disables (and restores) the Victron Venus OS services that hold the
//! Bluetooth adapter: `dbus-ble-sensors` and `vesmart-server`.

pub mod toggle;
