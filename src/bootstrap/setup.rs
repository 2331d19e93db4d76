//! Startup tasks.
//!
//! Includes:
//! - Logger initialization
//! - External tool availability checks (ffmpeg, ffprobe, magick)
//! - Working directory provisioning

use std::fs;
use std::process::Command;

use anyhow::{Context, Result};
use env_logger::Builder;
use log::{error, info};

use crate::config::{INPUT_DIR, JOBS_DIR, OUTPUT_DIR};

/// Initialize the logger. `debug` raises the global filter to Debug.
pub fn initialize_logger(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    Builder::new()
        .filter_level(level)
        .filter(Some("reqwest"), log::LevelFilter::Warn)
        .filter(Some("hyper"), log::LevelFilter::Warn)
        .init();
}

/// Check that every external tool the pipeline shells out to is in PATH.
pub fn check_external_tools() {
    for command in &["ffmpeg", "ffprobe", "magick"] {
        match Command::new(command).arg("-version").output() {
            Ok(output) if output.status.success() => {
                let version_info = String::from_utf8_lossy(&output.stdout);
                let version_number = version_info
                    .lines()
                    .next()
                    .unwrap_or("Unknown version")
                    .split_whitespace()
                    .nth(2)
                    .unwrap_or("Unknown");
                info!("{} version: {}", command, version_number);
            }
            Ok(_) => {
                error!(
                    "`{}` command was found, but it returned an error. Please ensure it's correctly installed.",
                    command
                );
            }
            Err(_) => {
                error!(
                    "`{}` is not installed or not available in PATH. Please install it before running the application.",
                    command
                );
            }
        }
    }
}

/// Wipe and recreate the working directory layout. Job state never survives
/// a restart, so leftovers from a previous run are unusable.
pub fn initialize_folders() -> Result<()> {
    for dir in [INPUT_DIR, JOBS_DIR, OUTPUT_DIR] {
        if fs::metadata(dir).is_ok() {
            fs::remove_dir_all(dir).with_context(|| format!("failed to clear {}", dir))?;
        }
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir))?;
    }
    Ok(())
}
