//! armctl firmware entry point.
//!
//! Usage: `armctl_firmware [config.json]`. Without a file every setting keeps
//! its default; `ARMCTL_HTTP_BIND` and `ARMCTL_BACKEND_URL` override the two
//! addresses.

use std::{path::PathBuf, process::ExitCode};

use armctl_firmware::{FirmwareConfig, build};

fn main() -> ExitCode {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match FirmwareConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("armctl: {err}");
            return ExitCode::FAILURE;
        }
    };

    match build(config) {
        Ok(mut app) => match app.run() {
            bevy::app::AppExit::Success => ExitCode::SUCCESS,
            bevy::app::AppExit::Error(code) => ExitCode::from(code.get()),
        },
        Err(err) => {
            eprintln!("armctl: {err}");
            ExitCode::FAILURE
        }
    }
}
