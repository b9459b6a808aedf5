// The disable/restore controller and the order its steps run in.

use anyhow::Result;
use std::path::Path;

pub mod daemontools;
pub mod model;
pub mod mount;
pub mod settings;
pub mod state;

use daemontools::{ServiceAction, Supervisor};
use model::{DISABLED, Layout, Mode, SETTINGS, Service, Setting};
use mount::{Mounter, RemountGuard};
use settings::SettingsBus;
use state::StateRecord;

/// What a run did. A second run with nothing changed in between reports
/// zero changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub changes: usize,
    pub warnings: usize,
}

impl Outcome {
    fn changed(&mut self) {
        self.changes += 1;
    }

    fn warn(&mut self, msg: std::fmt::Arguments) {
        log::warn!("{}", msg);
        self.warnings += 1;
    }
}

pub struct Controller<'a> {
    layout: Layout,
    supervisor: &'a dyn Supervisor,
    bus: &'a dyn SettingsBus,
    mounter: &'a dyn Mounter,
}

impl<'a> Controller<'a> {
    pub fn new(
        layout: Layout,
        supervisor: &'a dyn Supervisor,
        bus: &'a dyn SettingsBus,
        mounter: &'a dyn Mounter,
    ) -> Self {
        Self {
            layout,
            supervisor,
            bus,
            mounter,
        }
    }

    pub fn run(&self, mode: Mode) -> Result<Outcome> {
        match mode {
            Mode::Disable => self.disable(),
            Mode::Restore => self.restore(),
        }
    }

    /// The only fatal check: everything below assumes Venus OS paths.
    pub fn check_host(&self) -> Result<()> {
        let signature = self.layout.os_signature();
        if !signature.is_file() {
            anyhow::bail!(
                "{} not found, this does not look like Venus OS",
                signature.display()
            );
        }
        Ok(())
    }

    pub fn disable(&self) -> Result<Outcome> {
        self.check_host()?;
        let mut outcome = Outcome::default();

        self.capture_state(&mut outcome);
        for setting in &SETTINGS {
            self.apply_setting(setting, DISABLED, &mut outcome);
        }

        {
            let guard = RemountGuard::acquire(self.mounter, self.layout.rootfs());
            if guard.failed() {
                outcome.warnings += 1;
            }
            for service in self.layout.services() {
                self.disable_service(&service, &mut outcome);
            }
        }

        Ok(outcome)
    }

    pub fn restore(&self) -> Result<Outcome> {
        self.check_host()?;
        let mut outcome = Outcome::default();
        let state_file = &self.layout.state_file;

        let (record, mut settings_ok) = match StateRecord::load(state_file) {
            Ok(Some(record)) => (record, true),
            Ok(None) => {
                log::info!("No saved state in {}, enabling settings", state_file.display());
                (StateRecord::new(), true)
            }
            Err(e) => {
                outcome.warn(format_args!("{:#}, enabling settings", e));
                (StateRecord::new(), false)
            }
        };

        for setting in &SETTINGS {
            let target = record.value_or_enabled(setting.key);
            settings_ok &= self.apply_setting(setting, target, &mut outcome);
        }

        {
            let guard = RemountGuard::acquire(self.mounter, self.layout.rootfs());
            if guard.failed() {
                outcome.warnings += 1;
            }
            for service in self.layout.services() {
                self.restore_service(&service, &record, &mut outcome);
            }
        }

        if settings_ok {
            match StateRecord::remove(state_file) {
                Ok(true) => log::info!("Removed {}", state_file.display()),
                Ok(false) => {}
                Err(e) => outcome.warn(format_args!("{:#}", e)),
            }
        } else if state_file.exists() {
            log::warn!("Keeping {} for the next restore", state_file.display());
        }

        Ok(outcome)
    }

    /// Records the live setting values and the execute bits of every run
    /// script, unless an earlier disable already did. Settings that cannot
    /// be read are left out and restore as enabled.
    fn capture_state(&self, outcome: &mut Outcome) {
        let state_file = &self.layout.state_file;

        match StateRecord::load(state_file) {
            Ok(Some(_)) => {
                log::info!("Keeping state saved earlier in {}", state_file.display());
                return;
            }
            Ok(None) => {}
            Err(e) => {
                outcome.warn(format_args!("{:#}, not overwriting it", e));
                return;
            }
        }

        let mut record = StateRecord::new();
        for setting in &SETTINGS {
            match self.bus.get(setting.bus_path) {
                Ok(value) => record.insert(setting.key, value),
                Err(e) => outcome.warn(format_args!(
                    "Could not read {}: {:#}",
                    setting.bus_path, e
                )),
            }
        }

        for service in self.layout.services() {
            for path in service.run_scripts.iter().filter(|p| daemontools::is_run_script(p)) {
                match daemontools::exec_bits(path) {
                    Ok(bits) => record.insert(&state::exec_key(path), i64::from(bits)),
                    Err(e) => outcome.warn(format_args!("{:#}", e)),
                }
            }
        }

        if record.is_empty() {
            return;
        }
        match record.save(state_file) {
            Ok(()) => log::info!("Saved state to {}", state_file.display()),
            Err(e) => outcome.warn(format_args!("{:#}", e)),
        }
    }

    /// Returns false when the bus could not be written.
    fn apply_setting(&self, setting: &Setting, target: i64, outcome: &mut Outcome) -> bool {
        match self.bus.get(setting.bus_path) {
            Ok(current) if current == target => return true,
            Ok(current) => log::info!("Setting {}: {} -> {}", setting.bus_path, current, target),
            Err(e) => outcome.warn(format_args!(
                "Could not read {}: {:#}",
                setting.bus_path, e
            )),
        }

        match self.bus.set(setting.bus_path, target) {
            Ok(()) => {
                outcome.changed();
                true
            }
            Err(e) => {
                outcome.warn(format_args!(
                    "Could not set {} to {}: {:#}",
                    setting.bus_path, target, e
                ));
                false
            }
        }
    }

    fn disable_service(&self, service: &Service, outcome: &mut Outcome) {
        log::info!("Disabling {}", service.name);

        if daemontools::is_supervised(&service.link) {
            match self.supervisor.is_running(&service.link) {
                Ok(true) => {
                    log::info!("  Stopping {}", service.name);
                    match self.supervisor.control(&service.link, ServiceAction::Stop) {
                        Ok(()) => outcome.changed(),
                        Err(e) => outcome.warn(format_args!("  {:#}", e)),
                    }
                }
                Ok(false) => {}
                Err(e) => outcome.warn(format_args!("  {:#}", e)),
            }
        }
        match daemontools::unsupervise(&service.link) {
            Ok(true) => {
                log::info!("  Removed supervision for {}", service.name);
                outcome.changed();
            }
            Ok(false) => {}
            Err(e) => outcome.warn(format_args!("  {:#}", e)),
        }

        for path in &service.run_scripts {
            if !daemontools::is_run_script(path) {
                continue;
            }
            match daemontools::set_exec_bits(path, 0) {
                Ok(true) => {
                    log::info!("  Made non-executable: {}", path.display());
                    outcome.changed();
                }
                Ok(false) => {}
                Err(e) => outcome.warn(format_args!("  {:#}", e)),
            }
        }

        log::info!("  {} disabled", service.name);
    }

    /// Puts back the bits saved at disable time. Without a saved value a
    /// script that has no execute bit at all gets all three.
    fn restore_exec_bits(&self, path: &Path, record: &StateRecord) -> Result<bool> {
        let saved = record
            .get(&state::exec_key(path))
            .and_then(|bits| u32::try_from(bits).ok());

        match saved {
            Some(bits) => daemontools::set_exec_bits(path, bits),
            None if daemontools::is_executable(path)? => Ok(false),
            None => daemontools::set_exec_bits(path, 0o111),
        }
    }

    fn restore_service(&self, service: &Service, record: &StateRecord, outcome: &mut Outcome) {
        log::info!("Restoring {}", service.name);

        for path in &service.run_scripts {
            if !daemontools::is_run_script(path) {
                continue;
            }
            match self.restore_exec_bits(path, record) {
                Ok(true) => {
                    log::info!("  Made executable: {}", path.display());
                    outcome.changed();
                }
                Ok(false) => {}
                Err(e) => outcome.warn(format_args!("  {:#}", e)),
            }
        }

        let linked = match daemontools::supervise(&service.source_dir, &service.link) {
            Ok(true) => {
                log::info!("  Re-supervising {}", service.name);
                outcome.changed();
                true
            }
            Ok(false) => false,
            Err(e) => {
                outcome.warn(format_args!("  {:#}", e));
                false
            }
        };

        if daemontools::is_supervised(&service.link) {
            match self.supervisor.is_running(&service.link) {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("  Starting {}", service.name);
                    match self.supervisor.control(&service.link, ServiceAction::Start) {
                        Ok(()) => outcome.changed(),
                        // svscan has not picked the fresh link up yet; it
                        // starts the service itself on its next scan
                        Err(e) if linked => {
                            log::info!("  {} left to svscan ({:#})", service.name, e)
                        }
                        Err(e) => outcome.warn(format_args!("  {:#}", e)),
                    }
                }
                Err(e) => outcome.warn(format_args!("  {:#}", e)),
            }
        }

        log::info!("  {} restored", service.name);
    }
}
