//! Idempotent convergence engine.
//!
//! One `Convergence` run drives the host toward the declared state of a
//! `ProxyInstance` through a flat, ordered sequence of idempotent steps.
//! Each step reports whether it changed anything; a rendered file whose
//! content changed queues a restart notification for the owning unit.
//! Notifications are deduplicated in a set and flushed once, after every
//! write of the phase has landed.
//!
//! Ordering guarantees: identity before package install, default-instance
//! teardown before per-alias materialization, directories before the files
//! rendered into them, every write before the deferred restart flush.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::config::{self, ConfigError, ProxyInstance};
use crate::render::{
    INI_TEMPLATE, LOGROTATE_TEMPLATE, RenderError, Renderer, UPSTART_TEMPLATE, USERLIST_TEMPLATE,
};
use crate::system::{
    Accounts, FileSystem, Outcome, PackageManager, ServiceManager, SystemError,
};

/// Name of the proxy package.
pub const PROXY_PACKAGE: &str = "pgbouncer";

/// Install options passed through to the package manager: keep existing
/// conffiles when the package ships new defaults.
pub const PACKAGE_INSTALL_OPTIONS: [&str; 2] = ["-o", "Dpkg::Options::=--force-confold"];

/// Mode for directories managed by setup.
const DIR_MODE: u32 = 0o775;
/// Mode for the credentials file.
const USERLIST_MODE: u32 = 0o640;
/// Mode for the remaining rendered files.
const CONFIG_MODE: u32 = 0o644;

/// Error raised by a convergence run.
#[derive(Debug)]
pub enum ConvergeError {
    /// Filesystem operation failed.
    Io(io::Error),
    /// An external tool (package manager, supervisor, accounts) failed.
    System(SystemError),
    /// Template rendering failed; aborts before any further write.
    Render(RenderError),
    /// An alias failed validation before any side effect ran.
    Config(ConfigError),
    /// A lifecycle action targeted a unit that setup never registered.
    MissingUnit(String),
}

impl fmt::Display for ConvergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergeError::Io(e) => write!(f, "I/O error: {}", e),
            ConvergeError::System(e) => write!(f, "{}", e),
            ConvergeError::Render(e) => write!(f, "{}", e),
            ConvergeError::Config(e) => write!(f, "{}", e),
            ConvergeError::MissingUnit(unit) => {
                write!(f, "service unit {} is not registered, run setup first", unit)
            }
        }
    }
}

impl std::error::Error for ConvergeError {}

impl From<io::Error> for ConvergeError {
    fn from(e: io::Error) -> Self {
        ConvergeError::Io(e)
    }
}

impl From<SystemError> for ConvergeError {
    fn from(e: SystemError) -> Self {
        ConvergeError::System(e)
    }
}

impl From<RenderError> for ConvergeError {
    fn from(e: RenderError) -> Self {
        ConvergeError::Render(e)
    }
}

impl From<ConfigError> for ConvergeError {
    fn from(e: ConfigError) -> Self {
        ConvergeError::Config(e)
    }
}

/// One convergence run against a host.
///
/// Borrows the system seams for the duration of the run; the per-alias
/// supervisor handles upstart units, the default supervisor handles the
/// package's SysV instance.
pub struct Convergence<'a> {
    fs: &'a mut dyn FileSystem,
    packages: &'a mut dyn PackageManager,
    supervisor: &'a mut dyn ServiceManager,
    default_supervisor: &'a mut dyn ServiceManager,
    accounts: &'a mut dyn Accounts,
    renderer: &'a Renderer,
    /// Units with changed configuration, restarted once at flush time.
    pending_restarts: BTreeSet<String>,
}

impl<'a> Convergence<'a> {
    /// Creates a run over the given system seams.
    pub fn new(
        fs: &'a mut dyn FileSystem,
        packages: &'a mut dyn PackageManager,
        supervisor: &'a mut dyn ServiceManager,
        default_supervisor: &'a mut dyn ServiceManager,
        accounts: &'a mut dyn Accounts,
        renderer: &'a Renderer,
    ) -> Self {
        Self {
            fs,
            packages,
            supervisor,
            default_supervisor,
            accounts,
            renderer,
            pending_restarts: BTreeSet::new(),
        }
    }

    /// Converges the host to the instance's declared state.
    ///
    /// Reports `Changed` if any contained step had to touch the host, so the
    /// caller can decide whether dependents should react.
    pub fn setup(&mut self, instance: &ProxyInstance) -> Result<Outcome, ConvergeError> {
        let alias = &instance.db_alias;
        info!("setup: converging instance {}", alias);
        let mut outcome = Outcome::Unchanged;

        // Identity.
        outcome = outcome.merge(self.accounts.ensure_group(&instance.group)?);
        outcome = outcome.merge(
            self.accounts
                .ensure_system_user(&instance.user, &instance.group)?,
        );

        // Package, then retire the default instance it ships.
        outcome = outcome.merge(
            self.packages
                .install(PROXY_PACKAGE, &PACKAGE_INSTALL_OPTIONS)?,
        );
        outcome = outcome.merge(self.default_supervisor.stop(config::DEFAULT_SERVICE)?);
        outcome = outcome.merge(self.default_supervisor.disable(config::DEFAULT_SERVICE)?);
        outcome = outcome.merge(self.fs.remove_file(Path::new(config::PACKAGE_DEFAULT_INI))?);
        outcome = outcome.merge(
            self.fs
                .remove_file(Path::new(config::PACKAGE_DEFAULT_USERLIST))?,
        );

        // Directories before anything rendered into them.
        for dir in instance.directories() {
            outcome = outcome.merge(self.directory(&dir, &instance.user, &instance.group)?);
        }

        // Rendered artifacts. The upstart job file doubles as the unit's
        // registration with the supervisor.
        outcome = outcome.merge(self.render_file(
            instance,
            USERLIST_TEMPLATE,
            &config::userlist_path(alias),
            USERLIST_MODE,
        )?);
        outcome = outcome.merge(self.render_file(
            instance,
            INI_TEMPLATE,
            &config::ini_path(alias),
            CONFIG_MODE,
        )?);
        outcome = outcome.merge(self.render_file(
            instance,
            UPSTART_TEMPLATE,
            &config::upstart_unit_path(alias),
            CONFIG_MODE,
        )?);
        outcome = outcome.merge(self.render_file(
            instance,
            LOGROTATE_TEMPLATE,
            &config::logrotate_path(alias),
            CONFIG_MODE,
        )?);

        self.flush_restarts()?;

        if outcome.changed() {
            info!("setup: instance {} converged with changes", alias);
        } else {
            info!("setup: instance {} already converged", alias);
        }
        Ok(outcome)
    }

    /// Enables and starts the per-alias unit.
    pub fn start(&mut self, alias: &str) -> Result<Outcome, ConvergeError> {
        let unit = self.registered_unit(alias)?;
        let mut outcome = self.supervisor.enable(&unit)?;
        outcome = outcome.merge(self.supervisor.start(&unit)?);
        info!("start: {} is enabled and running", unit);
        Ok(outcome)
    }

    /// Enables and restarts the per-alias unit, starting it if stopped.
    pub fn restart(&mut self, alias: &str) -> Result<Outcome, ConvergeError> {
        let unit = self.registered_unit(alias)?;
        let mut outcome = self.supervisor.enable(&unit)?;
        outcome = outcome.merge(self.supervisor.restart(&unit)?);
        info!("restart: {} restarted", unit);
        Ok(outcome)
    }

    /// Stops the per-alias unit. The unit stays enabled and registered for a
    /// future start.
    pub fn stop(&mut self, alias: &str) -> Result<Outcome, ConvergeError> {
        let unit = self.registered_unit(alias)?;
        let outcome = self.supervisor.stop(&unit)?;
        if outcome.changed() {
            info!("stop: {} stopped", unit);
        } else {
            debug!("stop: {} was not running", unit);
        }
        Ok(outcome)
    }

    /// Deletes the four per-alias artifacts. Absence is not an error; the
    /// running process, directories, user, group and package are untouched.
    pub fn teardown(&mut self, alias: &str) -> Result<Outcome, ConvergeError> {
        config::validate_alias(alias)?;

        let mut outcome = Outcome::Unchanged;
        for path in config::artifact_paths(alias) {
            let removed = self.fs.remove_file(&path)?;
            if removed.changed() {
                info!("teardown: removed {}", path.display());
            }
            outcome = outcome.merge(removed);
        }
        Ok(outcome)
    }

    /// Resolves an alias to its unit name, failing when setup never rendered
    /// the unit's job file.
    fn registered_unit(&self, alias: &str) -> Result<String, ConvergeError> {
        config::validate_alias(alias)?;
        let unit = config::unit_name(alias);
        if !self.fs.exists(&config::upstart_unit_path(alias)) {
            return Err(ConvergeError::MissingUnit(unit));
        }
        Ok(unit)
    }

    /// Ensures a directory exists recursively with the managed ownership and
    /// mode.
    fn directory(&mut self, path: &Path, user: &str, group: &str) -> Result<Outcome, ConvergeError> {
        let mut outcome = self.fs.create_dir_all(path)?;
        outcome = outcome.merge(self.fs.set_owner(path, user, group)?);
        outcome = outcome.merge(self.fs.set_mode(path, DIR_MODE)?);
        if outcome.changed() {
            info!("directory {}", path.display());
        }
        Ok(outcome)
    }

    /// Renders one artifact and writes it if the content differs, queueing a
    /// restart notification for the instance's unit on change. Ownership and
    /// mode are re-asserted either way, without notifying.
    fn render_file(
        &mut self,
        instance: &ProxyInstance,
        template: &str,
        dest: &Path,
        mode: u32,
    ) -> Result<Outcome, ConvergeError> {
        let rendered = self.renderer.render(template, instance)?;
        let current = self.fs.read(dest)?;

        let mut outcome = Outcome::Unchanged;
        if current.as_deref() != Some(rendered.as_bytes()) {
            self.fs.write(dest, rendered.as_bytes())?;
            self.pending_restarts.insert(instance.unit_name());
            info!("rendered {}", dest.display());
            outcome = Outcome::Changed;
        } else {
            debug!("{} up to date", dest.display());
        }

        outcome = outcome.merge(self.fs.set_owner(dest, &instance.user, &instance.group)?);
        outcome = outcome.merge(self.fs.set_mode(dest, mode)?);
        Ok(outcome)
    }

    /// Restarts every unit with queued notifications, once each.
    fn flush_restarts(&mut self) -> Result<(), ConvergeError> {
        let pending = std::mem::take(&mut self.pending_restarts);
        for unit in pending {
            info!("configuration changed, restarting {}", unit);
            self.supervisor.enable(&unit)?;
            self.supervisor.restart(&unit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::{MockAccounts, MockFs, MockPackageManager, MockServiceManager};

    fn instance() -> ProxyInstance {
        toml::from_str(
            r#"
            db_alias = "main"
            db_host = "db.internal"
            db_name = "maindb"
            listen_port = 6432
            pool_mode = "transaction"

            [userlist]
            app = "md5d51c9a7e9353746a6020f9602d452929"
            "#,
        )
        .unwrap()
    }

    /// Mock host in the state the package leaves behind: default instance
    /// installed paths present, default SysV service enabled and running.
    struct Harness {
        fs: MockFs,
        packages: MockPackageManager,
        upstart: MockServiceManager,
        sysv: MockServiceManager,
        accounts: MockAccounts,
        renderer: Renderer,
    }

    impl Harness {
        fn new() -> Self {
            let mut fs = MockFs::new();
            fs.add_dir("/etc/init");
            fs.add_dir("/etc/logrotate.d");
            fs.add_file("/etc/pgbouncer/pgbouncer.ini", "packaged default");
            fs.add_file("/etc/pgbouncer/userlist.txt", "packaged default");

            let mut sysv = MockServiceManager::new();
            sysv.seed_enabled("pgbouncer");
            sysv.seed_running("pgbouncer");

            Self {
                fs,
                packages: MockPackageManager::new(),
                upstart: MockServiceManager::new(),
                sysv,
                accounts: MockAccounts::new(),
                renderer: Renderer::new().unwrap(),
            }
        }

        fn engine(&mut self) -> Convergence<'_> {
            Convergence::new(
                &mut self.fs,
                &mut self.packages,
                &mut self.upstart,
                &mut self.sysv,
                &mut self.accounts,
                &self.renderer,
            )
        }
    }

    #[test]
    fn setup_materializes_all_artifacts() {
        let mut h = Harness::new();
        let outcome = h.engine().setup(&instance()).unwrap();
        assert_eq!(outcome, Outcome::Changed);

        // Identity and package.
        assert!(h.accounts.groups.contains("postgres"));
        assert_eq!(h.accounts.users.get("postgres").unwrap(), "postgres");
        assert_eq!(h.packages.install_calls, vec!["pgbouncer"]);

        // Default instance retired.
        assert!(!h.sysv.is_running("pgbouncer").unwrap());
        assert!(!h.sysv.is_enabled("pgbouncer"));
        assert!(h.fs.file_str("/etc/pgbouncer/pgbouncer.ini").is_none());
        assert!(h.fs.file_str("/etc/pgbouncer/userlist.txt").is_none());

        // Directories.
        for dir in [
            "/var/log/pgbouncer",
            "/var/run/pgbouncer",
            "/var/run/pgbouncer/sockets",
            "/var/run/pgbouncer/sockets/main",
            "/etc/pgbouncer",
        ] {
            assert!(h.fs.has_dir(dir), "missing dir {}", dir);
            assert_eq!(h.fs.mode(dir), Some(0o775));
            assert_eq!(
                h.fs.owner(dir),
                Some(("postgres".to_string(), "postgres".to_string()))
            );
        }

        // Rendered artifacts with their modes.
        assert_eq!(h.fs.mode("/etc/pgbouncer/userlist-main.txt"), Some(0o640));
        assert_eq!(h.fs.mode("/etc/pgbouncer/pgbouncer-main.ini"), Some(0o644));
        assert_eq!(h.fs.mode("/etc/init/pgbouncer-main.conf"), Some(0o644));
        assert_eq!(h.fs.mode("/etc/logrotate.d/pgbouncer-main"), Some(0o644));

        let ini = h.fs.file_str("/etc/pgbouncer/pgbouncer-main.ini").unwrap();
        assert!(ini.contains("pool_mode = transaction"));
        assert!(ini.contains("listen_port = 6432"));

        let userlist = h.fs.file_str("/etc/pgbouncer/userlist-main.txt").unwrap();
        assert_eq!(
            userlist,
            "\"app\" \"md5d51c9a7e9353746a6020f9602d452929\"\n"
        );
    }

    #[test]
    fn setup_restarts_the_unit_once_per_run_with_changes() {
        let mut h = Harness::new();
        h.engine().setup(&instance()).unwrap();

        // Four files changed, one deferred restart.
        assert_eq!(h.upstart.restarts, vec!["pgbouncer-main"]);
    }

    #[test]
    fn second_setup_is_a_no_op() {
        let mut h = Harness::new();
        let inst = instance();
        h.engine().setup(&inst).unwrap();

        let outcome = h.engine().setup(&inst).unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(h.upstart.restarts.len(), 1, "no second restart expected");
    }

    #[test]
    fn changed_attribute_restarts_exactly_once() {
        let mut h = Harness::new();
        let mut inst = instance();
        h.engine().setup(&inst).unwrap();

        // log_dir appears in both the ini and the logrotate policy, so two
        // files change; still one notification.
        inst.log_dir = "/srv/log/pgbouncer".into();
        let outcome = h.engine().setup(&inst).unwrap();

        assert_eq!(outcome, Outcome::Changed);
        assert_eq!(h.upstart.restarts.len(), 2);
        assert!(
            h.fs.file_str("/etc/logrotate.d/pgbouncer-main")
                .unwrap()
                .contains("/srv/log/pgbouncer/pgbouncer-main.log")
        );
    }

    #[test]
    fn teardown_then_setup_reproduces_identical_artifacts() {
        let mut h = Harness::new();
        let inst = instance();
        h.engine().setup(&inst).unwrap();

        let before: Vec<Option<String>> = config::artifact_paths("main")
            .iter()
            .map(|p| h.fs.file_str(p))
            .collect();

        let outcome = h.engine().teardown("main").unwrap();
        assert_eq!(outcome, Outcome::Changed);
        for path in config::artifact_paths("main") {
            assert!(h.fs.file_str(&path).is_none(), "{} not deleted", path.display());
        }

        h.engine().setup(&inst).unwrap();
        let after: Vec<Option<String>> = config::artifact_paths("main")
            .iter()
            .map(|p| h.fs.file_str(p))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn teardown_of_absent_instance_reports_unchanged() {
        let mut h = Harness::new();
        assert_eq!(h.engine().teardown("ghost").unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn teardown_does_not_touch_the_running_service() {
        let mut h = Harness::new();
        h.engine().setup(&instance()).unwrap();
        assert!(h.upstart.is_running("pgbouncer-main").unwrap());

        h.engine().teardown("main").unwrap();
        assert!(h.upstart.is_running("pgbouncer-main").unwrap());
        assert!(h.upstart.stops.is_empty());
    }

    #[test]
    fn lifecycle_actions_require_setup() {
        let mut h = Harness::new();

        let start = h.engine().start("main");
        let restart = h.engine().restart("main");
        let stop = h.engine().stop("main");

        for result in [start, restart, stop] {
            match result {
                Err(ConvergeError::MissingUnit(unit)) => assert_eq!(unit, "pgbouncer-main"),
                other => panic!("expected MissingUnit, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn start_after_setup_enables_and_runs() {
        let mut h = Harness::new();
        h.engine().setup(&instance()).unwrap();

        h.engine().start("main").unwrap();
        assert!(h.upstart.is_enabled("pgbouncer-main"));
        assert!(h.upstart.is_running("pgbouncer-main").unwrap());
    }

    #[test]
    fn stop_keeps_the_unit_enabled() {
        let mut h = Harness::new();
        h.engine().setup(&instance()).unwrap();
        h.engine().start("main").unwrap();

        let outcome = h.engine().stop("main").unwrap();
        assert_eq!(outcome, Outcome::Changed);
        assert!(!h.upstart.is_running("pgbouncer-main").unwrap());
        assert!(h.upstart.is_enabled("pgbouncer-main"), "stop must not disable");

        // Stopping again changes nothing.
        assert_eq!(h.engine().stop("main").unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn restart_starts_a_stopped_unit() {
        let mut h = Harness::new();
        h.engine().setup(&instance()).unwrap();
        h.engine().stop("main").unwrap();

        let outcome = h.engine().restart("main").unwrap();
        assert_eq!(outcome, Outcome::Changed);
        assert!(h.upstart.is_running("pgbouncer-main").unwrap());
    }
}
