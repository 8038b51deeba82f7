//! Real filesystem implementation.
//!
//! Ownership assertion resolves account names to numeric ids by parsing the
//! host's `/etc/passwd` and `/etc/group` tables directly; both are
//! colon-separated with the numeric id in the third field.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt, chown};
use std::path::Path;

use super::traits::{FileSystem, Outcome};

/// Path to the user account table.
const PASSWD_PATH: &str = "/etc/passwd";
/// Path to the group table.
const GROUP_PATH: &str = "/etc/group";

/// Filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<Outcome> {
        if path.is_dir() {
            return Ok(Outcome::Unchanged);
        }
        fs::create_dir_all(path)?;
        Ok(Outcome::Changed)
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<Outcome> {
        match fs::remove_file(path) {
            Ok(()) => Ok(Outcome::Changed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Outcome::Unchanged),
            Err(e) => Err(e),
        }
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> io::Result<Outcome> {
        let metadata = fs::metadata(path)?;
        if metadata.permissions().mode() & 0o7777 == mode {
            return Ok(Outcome::Unchanged);
        }
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(Outcome::Changed)
    }

    fn set_owner(&mut self, path: &Path, user: &str, group: &str) -> io::Result<Outcome> {
        let uid = lookup_uid(user)?;
        let gid = lookup_gid(group)?;

        let metadata = fs::metadata(path)?;
        if metadata.uid() == uid && metadata.gid() == gid {
            return Ok(Outcome::Unchanged);
        }
        chown(path, Some(uid), Some(gid))?;
        Ok(Outcome::Changed)
    }
}

/// Resolves a user name to its uid via `/etc/passwd`.
pub(crate) fn lookup_uid(name: &str) -> io::Result<u32> {
    let content = fs::read_to_string(PASSWD_PATH)?;
    parse_id(&content, name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("user '{}' not found in {}", name, PASSWD_PATH),
        )
    })
}

/// Resolves a group name to its gid via `/etc/group`.
pub(crate) fn lookup_gid(name: &str) -> io::Result<u32> {
    let content = fs::read_to_string(GROUP_PATH)?;
    parse_id(&content, name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("group '{}' not found in {}", name, GROUP_PATH),
        )
    })
}

/// Extracts the numeric id for `name` from a passwd/group style table.
///
/// Both tables share the shape `name:x:id:...`, one entry per line.
fn parse_id(content: &str, name: &str) -> Option<u32> {
    for line in content.lines() {
        let mut fields = line.split(':');
        if fields.next() != Some(name) {
            continue;
        }
        fields.next(); // password placeholder
        return fields.next()?.parse().ok();
    }
    None
}
