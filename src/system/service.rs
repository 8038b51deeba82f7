//! Service supervision through upstart and SysV init.
//!
//! Per-alias units are upstart jobs: registered by dropping a job file into
//! `/etc/init`, disabled via a `manual` override file, driven with `initctl`.
//! The package's default instance is a SysV init script driven with `service`
//! and `update-rc.d`; it only ever needs stop and disable here.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::exec::{run, run_checked};
use super::traits::{Outcome, ServiceManager, SystemError};

/// Directory holding upstart job and override files.
const UPSTART_DIR: &str = "/etc/init";
/// Directory holding SysV init scripts.
const INIT_D: &str = "/etc/init.d";
/// Runlevel directories scanned for SysV start links.
const RC_DIRS: [&str; 4] = ["/etc/rc2.d", "/etc/rc3.d", "/etc/rc4.d", "/etc/rc5.d"];

/// Content of an upstart override file that keeps a job from auto-starting.
const MANUAL_OVERRIDE: &str = "manual\n";

/// Parses `initctl status` output for a running goal.
///
/// Running instances report `start/running`; the job also passes through
/// transient `start/*` goal states while coming up.
fn status_is_running(output: &str) -> bool {
    output.contains("start/")
}

/// True if a runlevel link name is a start link for `unit` (`S<NN><unit>`).
fn is_start_link(name: &str, unit: &str) -> bool {
    let Some(rest) = name.strip_prefix('S') else {
        return false;
    };
    let digits = rest.as_bytes().get(..2).unwrap_or_default();
    digits.len() == 2 && digits.iter().all(|b| b.is_ascii_digit()) && &rest[2..] == unit
}

/// Supervisor for upstart jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpstartManager;

impl UpstartManager {
    /// Creates a new `UpstartManager`.
    pub fn new() -> Self {
        Self
    }

    fn override_path(unit: &str) -> PathBuf {
        PathBuf::from(format!("{}/{}.override", UPSTART_DIR, unit))
    }
}

impl ServiceManager for UpstartManager {
    fn is_running(&self, unit: &str) -> Result<bool, SystemError> {
        let output = run("initctl", &["status", unit])?;
        if !output.status.success() {
            // "Unknown job" and friends: nothing running either way.
            return Ok(false);
        }
        Ok(status_is_running(&String::from_utf8_lossy(&output.stdout)))
    }

    fn enable(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        match fs::remove_file(Self::override_path(unit)) {
            Ok(()) => Ok(Outcome::Changed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Outcome::Unchanged),
            Err(e) => Err(SystemError::Io(e)),
        }
    }

    fn disable(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        let path = Self::override_path(unit);
        if fs::read_to_string(&path).is_ok_and(|c| c == MANUAL_OVERRIDE) {
            return Ok(Outcome::Unchanged);
        }
        fs::write(&path, MANUAL_OVERRIDE).map_err(SystemError::Io)?;
        Ok(Outcome::Changed)
    }

    fn start(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if self.is_running(unit)? {
            debug!("{} already running", unit);
            return Ok(Outcome::Unchanged);
        }
        run_checked("initctl", &["start", unit])?;
        Ok(Outcome::Changed)
    }

    fn stop(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if !self.is_running(unit)? {
            debug!("{} already stopped", unit);
            return Ok(Outcome::Unchanged);
        }
        run_checked("initctl", &["stop", unit])?;
        Ok(Outcome::Changed)
    }

    fn restart(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if self.is_running(unit)? {
            run_checked("initctl", &["restart", unit])?;
        } else {
            // initctl restart errors on a stopped job.
            debug!("{} not running, starting instead", unit);
            run_checked("initctl", &["start", unit])?;
        }
        Ok(Outcome::Changed)
    }
}

/// Supervisor for SysV init scripts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysvManager;

impl SysvManager {
    /// Creates a new `SysvManager`.
    pub fn new() -> Self {
        Self
    }

    fn script_path(unit: &str) -> PathBuf {
        PathBuf::from(format!("{}/{}", INIT_D, unit))
    }

    /// Scans runlevel directories for start links of `unit`.
    fn has_start_links(unit: &str) -> bool {
        for dir in RC_DIRS {
            let Ok(entries) = fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if is_start_link(&entry.file_name().to_string_lossy(), unit) {
                    return true;
                }
            }
        }
        false
    }
}

impl ServiceManager for SysvManager {
    fn is_running(&self, unit: &str) -> Result<bool, SystemError> {
        if !Self::script_path(unit).exists() {
            return Ok(false);
        }
        let output = run("service", &[unit, "status"])?;
        Ok(output.status.success())
    }

    fn enable(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if Self::has_start_links(unit) {
            return Ok(Outcome::Unchanged);
        }
        run_checked("update-rc.d", &[unit, "enable"])?;
        Ok(Outcome::Changed)
    }

    fn disable(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if !Self::script_path(unit).exists() {
            warn!("{} has no init script, skipping disable", unit);
            return Ok(Outcome::Unchanged);
        }
        if !Self::has_start_links(unit) {
            return Ok(Outcome::Unchanged);
        }
        run_checked("update-rc.d", &[unit, "disable"])?;
        Ok(Outcome::Changed)
    }

    fn start(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if self.is_running(unit)? {
            return Ok(Outcome::Unchanged);
        }
        run_checked("service", &[unit, "start"])?;
        Ok(Outcome::Changed)
    }

    fn stop(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if !self.is_running(unit)? {
            debug!("{} already stopped", unit);
            return Ok(Outcome::Unchanged);
        }
        run_checked("service", &[unit, "stop"])?;
        Ok(Outcome::Changed)
    }

    fn restart(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        run_checked("service", &[unit, "restart"])?;
        Ok(Outcome::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_goal_states_are_recognized() {
        assert!(status_is_running(
            "pgbouncer-main start/running, process 1234"
        ));
        assert!(status_is_running("pgbouncer-main start/starting"));
        assert!(!status_is_running("pgbouncer-main stop/waiting"));
    }

    #[test]
    fn start_links_match_exact_unit_names() {
        assert!(is_start_link("S20pgbouncer", "pgbouncer"));
        assert!(is_start_link("S99pgbouncer", "pgbouncer"));

        assert!(!is_start_link("K20pgbouncer", "pgbouncer"));
        assert!(!is_start_link("S20pgbouncer-main", "pgbouncer"));
        assert!(!is_start_link("S2pgbouncer", "pgbouncer"));
        assert!(!is_start_link("pgbouncer", "pgbouncer"));
        assert!(!is_start_link("S", "pgbouncer"));
    }
}
