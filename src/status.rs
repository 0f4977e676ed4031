//! Resident-process detection for `session status`.
//!
//! A resident process advertises itself with a pid file in the cache
//! directory. A pid file whose process is gone is reported as stale.

use std::{fs, path::Path};

use serde::Serialize;

pub const PID_FILE: &str = "mcpl.pid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResidentStatus {
    NotRunning,
    Running { pid: u32 },
    /// The pid file names a process that no longer exists.
    Stale { pid: u32 },
}

impl ResidentStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ResidentStatus::Running { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ResidentStatus::NotRunning => "not running".to_string(),
            ResidentStatus::Running { pid } => format!("running (pid {})", pid),
            ResidentStatus::Stale { pid } => format!("not running (stale pid file for {})", pid),
        }
    }
}

/// Inspect the pid file in `cache_dir`.
pub fn resident_status(cache_dir: &Path) -> ResidentStatus {
    let Ok(contents) = fs::read_to_string(cache_dir.join(PID_FILE)) else {
        return ResidentStatus::NotRunning;
    };
    match contents.trim().parse::<u32>() {
        Ok(pid) if process_exists(pid) => ResidentStatus::Running { pid },
        Ok(pid) => ResidentStatus::Stale { pid },
        Err(_) => ResidentStatus::NotRunning,
    }
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::{sys::signal::kill, unistd::Pid};

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 checks existence without delivering anything.
    kill(Pid::from_raw(raw), None).is_ok()
}

#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    false
}
