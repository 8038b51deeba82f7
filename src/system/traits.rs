//! Traits and shared types for system access.

use std::fmt;
use std::io;
use std::path::Path;

/// Result of one idempotent convergence step.
///
/// Failure is the `Err` arm of the surrounding `Result`; a step that ran
/// cleanly reports whether it actually had to touch anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Observed state already matched declared state.
    Unchanged,
    /// State was modified to match the declaration.
    Changed,
}

impl Outcome {
    /// True if the step modified anything.
    pub fn changed(self) -> bool {
        matches!(self, Outcome::Changed)
    }

    /// Combines two step outcomes; changed wins.
    pub fn merge(self, other: Outcome) -> Outcome {
        if self.changed() || other.changed() {
            Outcome::Changed
        } else {
            Outcome::Unchanged
        }
    }
}

/// Error raised by a system-tool invocation.
#[derive(Debug)]
pub enum SystemError {
    /// Spawning the tool failed.
    Io(io::Error),
    /// The tool ran and reported failure.
    Tool {
        /// The command line that failed.
        command: String,
        /// What the tool said, typically trimmed stderr.
        detail: String,
    },
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemError::Io(e) => write!(f, "I/O error: {}", e),
            SystemError::Tool { command, detail } => {
                write!(f, "'{}' failed: {}", command, detail)
            }
        }
    }
}

impl std::error::Error for SystemError {}

impl From<io::Error> for SystemError {
    fn from(e: io::Error) -> Self {
        SystemError::Io(e)
    }
}

/// Filesystem operations the engine needs.
///
/// Mirrors what a configuration run does to disk: compare-and-write files,
/// recursive directory creation, delete-if-present, ownership and mode
/// assertion. Content comparison itself lives in the engine; this trait stays
/// primitive so the mock can be a plain in-memory map.
pub trait FileSystem {
    /// Reads a file, `None` if it does not exist.
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Writes a file, truncating any previous content. The parent directory
    /// must already exist.
    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Creates a directory and all missing parents.
    fn create_dir_all(&mut self, path: &Path) -> io::Result<Outcome>;

    /// Removes a file if it exists; absence is not an error.
    fn remove_file(&mut self, path: &Path) -> io::Result<Outcome>;

    /// Asserts the permission bits on an existing path.
    fn set_mode(&mut self, path: &Path, mode: u32) -> io::Result<Outcome>;

    /// Asserts ownership on an existing path, resolving names to ids.
    fn set_owner(&mut self, path: &Path, user: &str, group: &str) -> io::Result<Outcome>;
}

/// Package installation by name.
pub trait PackageManager {
    /// Ensures a package is installed, passing `options` through to the
    /// underlying tool verbatim.
    fn install(&mut self, package: &str, options: &[&str]) -> Result<Outcome, SystemError>;
}

/// Lifecycle control of one named service unit.
///
/// Registration is not part of this trait: a unit is registered by the
/// presence of its definition file, which the engine checks through
/// `FileSystem` before acting.
pub trait ServiceManager {
    /// True if the unit currently has a running instance.
    fn is_running(&self, unit: &str) -> Result<bool, SystemError>;

    /// Allows the unit to start on boot.
    fn enable(&mut self, unit: &str) -> Result<Outcome, SystemError>;

    /// Prevents the unit from starting on boot.
    fn disable(&mut self, unit: &str) -> Result<Outcome, SystemError>;

    /// Starts the unit if not already running.
    fn start(&mut self, unit: &str) -> Result<Outcome, SystemError>;

    /// Stops the unit if running; a stopped unit is a no-op.
    fn stop(&mut self, unit: &str) -> Result<Outcome, SystemError>;

    /// Restarts the unit; a stopped unit is started. Always reports
    /// `Changed` when it ran.
    fn restart(&mut self, unit: &str) -> Result<Outcome, SystemError>;
}

/// System group and user provisioning.
pub trait Accounts {
    /// Ensures a system group exists.
    fn ensure_group(&mut self, name: &str) -> Result<Outcome, SystemError>;

    /// Ensures a system user exists with the given primary group.
    fn ensure_system_user(&mut self, name: &str, group: &str) -> Result<Outcome, SystemError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_changed() {
        assert_eq!(
            Outcome::Unchanged.merge(Outcome::Unchanged),
            Outcome::Unchanged
        );
        assert_eq!(Outcome::Unchanged.merge(Outcome::Changed), Outcome::Changed);
        assert_eq!(Outcome::Changed.merge(Outcome::Unchanged), Outcome::Changed);
        assert_eq!(Outcome::Changed.merge(Outcome::Changed), Outcome::Changed);
    }
}
