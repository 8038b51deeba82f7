//! Package installation through dpkg/apt.

use tracing::{debug, info};

use super::exec::{run, run_checked};
use super::traits::{Outcome, PackageManager, SystemError};

/// Package manager driving `dpkg-query` and `apt-get`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AptPackageManager;

impl AptPackageManager {
    /// Creates a new `AptPackageManager`.
    pub fn new() -> Self {
        Self
    }
}

/// Builds the `apt-get` argument list for an install.
fn install_args<'a>(package: &'a str, options: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec!["install", "-y"];
    args.extend_from_slice(options);
    args.push(package);
    args
}

/// Queries dpkg for the package's install status.
fn is_installed(package: &str) -> Result<bool, SystemError> {
    let output = run("dpkg-query", &["-W", "-f", "${db:Status-Status}", package])?;
    // Non-zero exit means dpkg has never heard of the package.
    Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "installed")
}

impl PackageManager for AptPackageManager {
    fn install(&mut self, package: &str, options: &[&str]) -> Result<Outcome, SystemError> {
        if is_installed(package)? {
            debug!("package {} already installed", package);
            return Ok(Outcome::Unchanged);
        }

        run_checked("apt-get", &install_args(package, options))?;
        info!("installed package {}", package);
        Ok(Outcome::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_args_pass_options_through_before_the_package() {
        let args = install_args("pgbouncer", &["-o", "Dpkg::Options::=--force-confold"]);
        assert_eq!(
            args,
            vec![
                "install",
                "-y",
                "-o",
                "Dpkg::Options::=--force-confold",
                "pgbouncer"
            ]
        );
    }
}
