use clap::{ArgAction, Parser};
use disable_victron_bluetooth::toggle::{
    Controller, daemontools::Svc, model::Layout, model::Mode, mount::SystemMount,
    settings::VenusSettings,
};
use std::io::Write;
use std::process::ExitCode;

/// Disable (or restore) Victron's built-in BLE services on Venus OS.
#[derive(Parser, Debug)]
#[command(
    name = "disable-victron-bluetooth",
    version,
    disable_version_flag = true,
    after_help = "Services: dbus-ble-sensors, vesmart-server"
)]
struct Cli {
    /// Re-enable the services and put the saved settings back
    #[arg(short, long)]
    restore: bool,

    /// Print version
    #[arg(short = 'v', short_alias = 'V', long, action = ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| match record.level() {
            log::Level::Info => writeln!(buf, "[disable-victron-bt] {}", record.args()),
            level => writeln!(buf, "[disable-victron-bt] {}: {}", level, record.args()),
        })
        .init();

    let mode = if cli.restore {
        Mode::Restore
    } else {
        Mode::Disable
    };

    let settings = VenusSettings::connect();
    let controller = Controller::new(Layout::from_env(), &Svc, &settings, &SystemMount);

    match controller.run(mode) {
        Ok(outcome) => {
            log::info!(
                "Done: {} change(s), {} warning(s)",
                outcome.changes,
                outcome.warnings
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
