//! Seams to the host's system tooling.
//!
//! The convergence engine touches the host only through the traits defined in
//! `traits`: the filesystem, the package manager, service supervisors and
//! account management. Each has one real Linux implementation driving the
//! usual OS tools, and one in-memory mock so engine behavior can be tested
//! without a root shell:
//!
//! - `FileSystem` — `RealFs` (std::fs + chown) / `MockFs`
//! - `PackageManager` — `AptPackageManager` (dpkg-query, apt-get) / `MockPackageManager`
//! - `ServiceManager` — `UpstartManager` (initctl, override files) and
//!   `SysvManager` (service, update-rc.d) / `MockServiceManager`
//! - `Accounts` — `RealAccounts` (getent, groupadd, useradd) / `MockAccounts`

pub mod accounts;
pub mod apt;
mod exec;
pub mod fs;
pub mod mock;
pub mod service;
pub mod traits;

pub use accounts::RealAccounts;
pub use apt::AptPackageManager;
pub use fs::RealFs;
pub use service::{SysvManager, UpstartManager};
pub use traits::{Accounts, FileSystem, Outcome, PackageManager, ServiceManager, SystemError};
