//! System group and user provisioning through getent/groupadd/useradd.

use tracing::info;

use super::exec::{run, run_checked, tool_error};
use super::traits::{Accounts, Outcome, SystemError};

/// Account provisioning against the host's name service.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealAccounts;

impl RealAccounts {
    /// Creates a new `RealAccounts`.
    pub fn new() -> Self {
        Self
    }
}

/// Checks a name service database for an entry. getent exits 0 when the key
/// exists and 2 when it does not; anything else is a real failure.
fn entry_exists(database: &str, key: &str) -> Result<bool, SystemError> {
    let args = [database, key];
    let output = run("getent", &args)?;
    match output.status.code() {
        Some(0) => Ok(true),
        Some(2) => Ok(false),
        _ => Err(tool_error("getent", &args, &output)),
    }
}

impl Accounts for RealAccounts {
    fn ensure_group(&mut self, name: &str) -> Result<Outcome, SystemError> {
        if entry_exists("group", name)? {
            return Ok(Outcome::Unchanged);
        }
        run_checked("groupadd", &["--system", name])?;
        info!("created group {}", name);
        Ok(Outcome::Changed)
    }

    fn ensure_system_user(&mut self, name: &str, group: &str) -> Result<Outcome, SystemError> {
        if entry_exists("passwd", name)? {
            return Ok(Outcome::Unchanged);
        }
        run_checked(
            "useradd",
            &[
                "--system",
                "--gid",
                group,
                "--shell",
                "/bin/false",
                "--no-create-home",
                name,
            ],
        )?;
        info!("created system user {}", name);
        Ok(Outcome::Changed)
    }
}
