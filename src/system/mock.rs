//! In-memory mock implementations for testing the convergence engine.
//!
//! The mocks simulate host state in plain maps and sets, allowing engine
//! behavior (idempotence, ordering, deferred restarts) to be tested without
//! root privileges or a real init system. They also record the lifecycle
//! calls they receive so tests can assert on what was driven, not only on
//! the end state.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use super::traits::{Accounts, FileSystem, Outcome, PackageManager, ServiceManager, SystemError};

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, Vec<u8>>,
    /// Set of directories.
    directories: HashSet<PathBuf>,
    /// Permission bits asserted per path.
    modes: HashMap<PathBuf, u32>,
    /// Ownership asserted per path.
    owners: HashMap<PathBuf, (String, String)>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds a directory, creating parents.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Adds a file with the given content, creating parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.as_ref().to_vec());
    }

    /// File content as a string, if present.
    pub fn file_str(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .get(path.as_ref())
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Asserted permission bits, if any were set.
    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.modes.get(path.as_ref()).copied()
    }

    /// Asserted ownership, if any was set.
    pub fn owner(&self, path: impl AsRef<Path>) -> Option<(String, String)> {
        self.owners.get(path.as_ref()).cloned()
    }

    /// True if a directory is present.
    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.directories.contains(path.as_ref())
    }
}

impl FileSystem for MockFs {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        Ok(self.files.get(path).cloned())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        match path.parent() {
            Some(parent) if self.directories.contains(parent) => {
                self.files.insert(path.to_path_buf(), contents.to_vec());
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory missing for {}", path.display()),
            )),
        }
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<Outcome> {
        if self.directories.contains(path) {
            return Ok(Outcome::Unchanged);
        }
        self.add_dir(path);
        Ok(Outcome::Changed)
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<Outcome> {
        if self.files.remove(path).is_some() {
            self.modes.remove(path);
            self.owners.remove(path);
            Ok(Outcome::Changed)
        } else {
            Ok(Outcome::Unchanged)
        }
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> io::Result<Outcome> {
        if !self.exists(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such path: {}", path.display()),
            ));
        }
        if self.modes.insert(path.to_path_buf(), mode) == Some(mode) {
            Ok(Outcome::Unchanged)
        } else {
            Ok(Outcome::Changed)
        }
    }

    fn set_owner(&mut self, path: &Path, user: &str, group: &str) -> io::Result<Outcome> {
        if !self.exists(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such path: {}", path.display()),
            ));
        }
        let owner = (user.to_string(), group.to_string());
        if self.owners.insert(path.to_path_buf(), owner.clone()) == Some(owner) {
            Ok(Outcome::Unchanged)
        } else {
            Ok(Outcome::Changed)
        }
    }
}

/// Package manager recording installs in memory.
#[derive(Debug, Clone, Default)]
pub struct MockPackageManager {
    /// Packages currently "installed".
    pub installed: BTreeSet<String>,
    /// Every install call received, in order.
    pub install_calls: Vec<String>,
}

impl MockPackageManager {
    /// Creates a new empty mock package manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackageManager for MockPackageManager {
    fn install(&mut self, package: &str, _options: &[&str]) -> Result<Outcome, SystemError> {
        self.install_calls.push(package.to_string());
        if self.installed.insert(package.to_string()) {
            Ok(Outcome::Changed)
        } else {
            Ok(Outcome::Unchanged)
        }
    }
}

/// Service supervisor tracking enable/run state and recording calls.
#[derive(Debug, Clone, Default)]
pub struct MockServiceManager {
    enabled: BTreeSet<String>,
    running: BTreeSet<String>,
    /// Units started, in call order.
    pub starts: Vec<String>,
    /// Units stopped, in call order.
    pub stops: Vec<String>,
    /// Units restarted, in call order.
    pub restarts: Vec<String>,
}

impl MockServiceManager {
    /// Creates a new mock supervisor with nothing running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a unit as running, as if started before the test.
    pub fn seed_running(&mut self, unit: &str) {
        self.running.insert(unit.to_string());
    }

    /// Seeds a unit as enabled.
    pub fn seed_enabled(&mut self, unit: &str) {
        self.enabled.insert(unit.to_string());
    }

    /// True if the unit is enabled.
    pub fn is_enabled(&self, unit: &str) -> bool {
        self.enabled.contains(unit)
    }
}

impl ServiceManager for MockServiceManager {
    fn is_running(&self, unit: &str) -> Result<bool, SystemError> {
        Ok(self.running.contains(unit))
    }

    fn enable(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if self.enabled.insert(unit.to_string()) {
            Ok(Outcome::Changed)
        } else {
            Ok(Outcome::Unchanged)
        }
    }

    fn disable(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if self.enabled.remove(unit) {
            Ok(Outcome::Changed)
        } else {
            Ok(Outcome::Unchanged)
        }
    }

    fn start(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if self.running.contains(unit) {
            return Ok(Outcome::Unchanged);
        }
        self.running.insert(unit.to_string());
        self.starts.push(unit.to_string());
        Ok(Outcome::Changed)
    }

    fn stop(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        if self.running.remove(unit) {
            self.stops.push(unit.to_string());
            Ok(Outcome::Changed)
        } else {
            Ok(Outcome::Unchanged)
        }
    }

    fn restart(&mut self, unit: &str) -> Result<Outcome, SystemError> {
        self.restarts.push(unit.to_string());
        self.running.insert(unit.to_string());
        Ok(Outcome::Changed)
    }
}

/// Account provisioning backed by in-memory sets.
#[derive(Debug, Clone, Default)]
pub struct MockAccounts {
    /// Groups present.
    pub groups: BTreeSet<String>,
    /// Users present, with their primary group.
    pub users: BTreeMap<String, String>,
}

impl MockAccounts {
    /// Creates a new empty mock account store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accounts for MockAccounts {
    fn ensure_group(&mut self, name: &str) -> Result<Outcome, SystemError> {
        if self.groups.insert(name.to_string()) {
            Ok(Outcome::Changed)
        } else {
            Ok(Outcome::Unchanged)
        }
    }

    fn ensure_system_user(&mut self, name: &str, group: &str) -> Result<Outcome, SystemError> {
        if self.users.contains_key(name) {
            return Ok(Outcome::Unchanged);
        }
        self.users.insert(name.to_string(), group.to_string());
        Ok(Outcome::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_parent_directory() {
        let mut fs = MockFs::new();
        assert!(fs.write(Path::new("/etc/init/a.conf"), b"x").is_err());

        fs.add_dir("/etc/init");
        fs.write(Path::new("/etc/init/a.conf"), b"x").unwrap();
        assert_eq!(fs.file_str("/etc/init/a.conf").unwrap(), "x");
    }

    #[test]
    fn set_mode_tracks_change() {
        let mut fs = MockFs::new();
        fs.add_file("/etc/f", "x");

        assert_eq!(fs.set_mode(Path::new("/etc/f"), 0o640).unwrap(), Outcome::Changed);
        assert_eq!(
            fs.set_mode(Path::new("/etc/f"), 0o640).unwrap(),
            Outcome::Unchanged
        );
    }

    #[test]
    fn service_stop_leaves_enabled_flag() {
        let mut svc = MockServiceManager::new();
        svc.enable("u").unwrap();
        svc.start("u").unwrap();
        svc.stop("u").unwrap();

        assert!(svc.is_enabled("u"));
        assert!(!svc.is_running("u").unwrap());
    }
}
