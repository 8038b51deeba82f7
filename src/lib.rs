//! pgbouncerctl - convergence library for per-alias PgBouncer instances.
//!
//! Provides:
//! - `config` — typed instance attributes, TOML loading, derived artifact paths
//! - `render` — embedded Tera templates for the rendered artifacts
//! - `system` — seams to the host's filesystem, package manager, supervisors and accounts
//! - `converge` — idempotent convergence engine and lifecycle actions

pub mod config;
pub mod converge;
pub mod render;
pub mod system;
