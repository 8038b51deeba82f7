//! Typed configuration for one proxy instance.
//!
//! A `ProxyInstance` is the full attribute bag for one PgBouncer alias on a
//! host: identity, network endpoints, filesystem locations, pool tuning and
//! credentials. Instances are loaded from a TOML file whose top level is the
//! instance table plus a `[userlist]` table of username → auth secret.
//!
//! Every artifact the convergence engine manages (ini, userlist, upstart job,
//! logrotate policy, service unit name) is derived from `db_alias` plus these
//! attributes and nothing else, so path helpers live here too.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Directory holding rendered pgbouncer configuration.
pub const CONFIG_DIR: &str = "/etc/pgbouncer";
/// Directory holding upstart job definitions.
pub const UPSTART_DIR: &str = "/etc/init";
/// Directory holding logrotate policies.
pub const LOGROTATE_DIR: &str = "/etc/logrotate.d";

/// Default config files shipped by the pgbouncer package. Deleted during
/// setup so only per-alias files remain under `/etc/pgbouncer`.
pub const PACKAGE_DEFAULT_INI: &str = "/etc/pgbouncer/pgbouncer.ini";
pub const PACKAGE_DEFAULT_USERLIST: &str = "/etc/pgbouncer/userlist.txt";

/// Service name of the default instance shipped by the package.
pub const DEFAULT_SERVICE: &str = "pgbouncer";

/// Error raised while loading or validating an instance definition.
#[derive(Debug)]
pub enum ConfigError {
    /// Could not read the definition file.
    Io(io::Error),
    /// The definition file is not valid TOML for a `ProxyInstance`.
    Parse(toml::de::Error),
    /// The definition parsed but violates an invariant.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// How server connections are shared across client sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// Server released when the client disconnects.
    Session,
    /// Server released when the transaction finishes.
    Transaction,
    /// Server released after every statement.
    Statement,
}

impl fmt::Display for PoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolMode::Session => "session",
            PoolMode::Transaction => "transaction",
            PoolMode::Statement => "statement",
        };
        f.write_str(s)
    }
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_group() -> String {
    "postgres".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_connect_query() -> String {
    "SELECT 1".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    6432
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/pgbouncer")
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from("/var/run/pgbouncer")
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/var/run/pgbouncer/sockets")
}

fn default_pool_mode() -> PoolMode {
    PoolMode::Transaction
}

fn default_max_client_conn() -> u32 {
    100
}

fn default_pool_size() -> u32 {
    20
}

fn default_reserve_pool_timeout() -> u32 {
    5
}

fn default_server_idle_timeout() -> u32 {
    600
}

fn default_server_check_delay() -> u32 {
    30
}

fn default_server_reset_query() -> String {
    "DISCARD ALL".to_string()
}

/// Attribute bag for one proxy instance, keyed by `db_alias`.
///
/// Optional TCP keepalive attributes are genuinely optional: when absent they
/// must not appear in the rendered ini at all, so they stay `Option` here and
/// the renderer only inserts them into the template context when set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyInstance {
    /// Logical name of this instance, interpolated into every artifact path
    /// and the service unit name. Must be filesystem-path-safe.
    pub db_alias: String,

    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_group")]
    pub group: String,

    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_name: String,
    #[serde(default = "default_connect_query")]
    pub connect_query: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    #[serde(default = "default_pool_mode")]
    pub pool_mode: PoolMode,
    #[serde(default = "default_max_client_conn")]
    pub max_client_conn: u32,
    #[serde(default = "default_pool_size")]
    pub default_pool_size: u32,
    #[serde(default)]
    pub min_pool_size: u32,
    #[serde(default)]
    pub reserve_pool_size: u32,
    #[serde(default = "default_reserve_pool_timeout")]
    pub reserve_pool_timeout: u32,
    #[serde(default)]
    pub server_round_robin: u32,
    #[serde(default = "default_server_idle_timeout")]
    pub server_idle_timeout: u32,
    #[serde(default = "default_server_check_delay")]
    pub server_check_delay: u32,
    #[serde(default = "default_server_reset_query")]
    pub server_reset_query: String,

    #[serde(default)]
    pub tcp_keepalive: Option<u32>,
    #[serde(default)]
    pub tcp_keepidle: Option<u32>,
    #[serde(default)]
    pub tcp_keepintvl: Option<u32>,

    /// Username → auth secret, rendered into the per-alias userlist file.
    /// Ordered map so rendering is deterministic.
    #[serde(default)]
    pub userlist: BTreeMap<String, String>,
}

impl ProxyInstance {
    /// Loads and validates an instance definition from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let instance: ProxyInstance = toml::from_str(&raw)?;
        instance.validate()?;
        Ok(instance)
    }

    /// Checks the invariants the convergence engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_alias(&self.db_alias)?;

        if self.user.is_empty() || self.group.is_empty() {
            return Err(ConfigError::Invalid("user and group must be set".into()));
        }

        for (label, dir) in [
            ("log_dir", &self.log_dir),
            ("pid_dir", &self.pid_dir),
            ("socket_dir", &self.socket_dir),
        ] {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be an absolute path, got '{}'",
                    label,
                    dir.display()
                )));
            }
        }

        for (name, secret) in &self.userlist {
            if name.is_empty() {
                return Err(ConfigError::Invalid("userlist entry with empty username".into()));
            }
            if name.contains('"') || secret.contains('"') {
                return Err(ConfigError::Invalid(format!(
                    "userlist entry '{}' contains a double quote",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Service unit name for this instance.
    pub fn unit_name(&self) -> String {
        unit_name(&self.db_alias)
    }

    /// Directories that must exist before files are rendered, in creation
    /// order. All are created recursively with mode 0775, owned user:group.
    pub fn directories(&self) -> Vec<PathBuf> {
        vec![
            self.log_dir.clone(),
            self.pid_dir.clone(),
            self.socket_dir.clone(),
            self.socket_dir.join(&self.db_alias),
            PathBuf::from(CONFIG_DIR),
        ]
    }
}

/// Validates that an alias is safe to interpolate into paths and unit names.
pub fn validate_alias(alias: &str) -> Result<(), ConfigError> {
    let ok = !alias.is_empty()
        && alias
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "db_alias '{}' must match [A-Za-z0-9_-]+",
            alias
        )))
    }
}

/// Service unit name for an alias.
pub fn unit_name(alias: &str) -> String {
    format!("pgbouncer-{}", alias)
}

/// Per-alias credentials file, mode 0640.
pub fn userlist_path(alias: &str) -> PathBuf {
    PathBuf::from(format!("{}/userlist-{}.txt", CONFIG_DIR, alias))
}

/// Per-alias main configuration, mode 0644.
pub fn ini_path(alias: &str) -> PathBuf {
    PathBuf::from(format!("{}/pgbouncer-{}.ini", CONFIG_DIR, alias))
}

/// Per-alias upstart job definition, mode 0644. Its presence is what
/// registers the unit with the supervisor.
pub fn upstart_unit_path(alias: &str) -> PathBuf {
    PathBuf::from(format!("{}/{}.conf", UPSTART_DIR, unit_name(alias)))
}

/// Per-alias logrotate policy, mode 0644.
pub fn logrotate_path(alias: &str) -> PathBuf {
    PathBuf::from(format!("{}/{}", LOGROTATE_DIR, unit_name(alias)))
}

/// The four rendered artifacts for an alias, in render order.
pub fn artifact_paths(alias: &str) -> [PathBuf; 4] {
    [
        userlist_path(alias),
        ini_path(alias),
        upstart_unit_path(alias),
        logrotate_path(alias),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        db_alias = "main"
        db_host = "db.internal"
        db_name = "maindb"

        [userlist]
        app = "md5d51c9a7e9353746a6020f9602d452929"
    "#;

    #[test]
    fn minimal_definition_gets_defaults() {
        let instance: ProxyInstance = toml::from_str(MINIMAL).unwrap();
        instance.validate().unwrap();

        assert_eq!(instance.user, "postgres");
        assert_eq!(instance.db_port, 5432);
        assert_eq!(instance.listen_port, 6432);
        assert_eq!(instance.pool_mode, PoolMode::Transaction);
        assert_eq!(instance.max_client_conn, 100);
        assert_eq!(instance.min_pool_size, 0);
        assert_eq!(instance.tcp_keepalive, None);
        assert_eq!(instance.userlist.len(), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = format!("not_a_key = 1\n{}", MINIMAL);
        assert!(toml::from_str::<ProxyInstance>(&raw).is_err());
    }

    #[test]
    fn alias_must_be_path_safe() {
        assert!(validate_alias("main").is_ok());
        assert!(validate_alias("replica-2").is_ok());
        assert!(validate_alias("with_underscore").is_ok());

        assert!(validate_alias("").is_err());
        assert!(validate_alias("../etc").is_err());
        assert!(validate_alias("a b").is_err());
        assert!(validate_alias("a/b").is_err());
    }

    #[test]
    fn relative_directories_are_rejected() {
        let mut instance: ProxyInstance = toml::from_str(MINIMAL).unwrap();
        instance.log_dir = PathBuf::from("logs");
        let err = instance.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn quoted_userlist_entries_are_rejected() {
        let mut instance: ProxyInstance = toml::from_str(MINIMAL).unwrap();
        instance
            .userlist
            .insert("evil\"user".to_string(), "secret".to_string());
        assert!(instance.validate().is_err());
    }

    #[test]
    fn artifact_paths_derive_from_alias() {
        assert_eq!(unit_name("main"), "pgbouncer-main");
        assert_eq!(
            userlist_path("main"),
            PathBuf::from("/etc/pgbouncer/userlist-main.txt")
        );
        assert_eq!(
            ini_path("main"),
            PathBuf::from("/etc/pgbouncer/pgbouncer-main.ini")
        );
        assert_eq!(
            upstart_unit_path("main"),
            PathBuf::from("/etc/init/pgbouncer-main.conf")
        );
        assert_eq!(
            logrotate_path("main"),
            PathBuf::from("/etc/logrotate.d/pgbouncer-main")
        );
    }

    #[test]
    fn directories_include_per_alias_socket_dir() {
        let instance: ProxyInstance = toml::from_str(MINIMAL).unwrap();
        let dirs = instance.directories();
        assert!(dirs.contains(&PathBuf::from("/var/run/pgbouncer/sockets/main")));
        assert!(dirs.contains(&PathBuf::from("/etc/pgbouncer")));
    }
}
