//! pgbouncerctl - per-alias PgBouncer convergence tool.
//!
//! Converges a Linux host toward the declared state of one PgBouncer
//! instance: system accounts, the pgbouncer package, per-alias config,
//! upstart job, logrotate policy, and the instance's service lifecycle.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use pgbouncerctl::config::{self, ProxyInstance};
use pgbouncerctl::converge::Convergence;
use pgbouncerctl::render::Renderer;
use pgbouncerctl::system::{
    AptPackageManager, Outcome, RealAccounts, RealFs, SysvManager, UpstartManager,
};

/// Per-alias PgBouncer convergence tool.
#[derive(Parser)]
#[command(name = "pgbouncerctl", about = "Per-alias PgBouncer convergence tool", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Converge the host to an instance definition (idempotent).
    Setup {
        /// Path to the instance definition (TOML).
        definition: PathBuf,
    },
    /// Enable and start the instance's service unit.
    Start {
        /// Instance alias.
        alias: String,
    },
    /// Enable and restart the instance's service unit, starting it if stopped.
    Restart {
        /// Instance alias.
        alias: String,
    },
    /// Stop the instance's service unit without disabling it.
    Stop {
        /// Instance alias.
        alias: String,
    },
    /// Delete the instance's rendered files. Leaves the process, directories,
    /// accounts and package in place.
    Teardown {
        /// Instance alias.
        alias: String,
    },
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgbouncerctl={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// One-word summary of a run's outcome for the final log line.
fn outcome_word(outcome: Outcome) -> &'static str {
    if outcome.changed() { "changed" } else { "up to date" }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args.command) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let renderer = Renderer::new()?;
    let mut fs = RealFs::new();
    let mut packages = AptPackageManager::new();
    let mut upstart = UpstartManager::new();
    let mut sysv = SysvManager::new();
    let mut accounts = RealAccounts::new();

    let mut convergence = Convergence::new(
        &mut fs,
        &mut packages,
        &mut upstart,
        &mut sysv,
        &mut accounts,
        &renderer,
    );

    match command {
        Command::Setup { definition } => {
            let instance = ProxyInstance::load(&definition)?;
            info!(
                "pgbouncerctl {} setup for alias {}",
                env!("CARGO_PKG_VERSION"),
                instance.db_alias
            );
            let outcome = convergence.setup(&instance)?;
            info!("setup: {}", outcome_word(outcome));
        }
        Command::Start { alias } => {
            config::validate_alias(&alias)?;
            let outcome = convergence.start(&alias)?;
            info!("start: {}", outcome_word(outcome));
        }
        Command::Restart { alias } => {
            config::validate_alias(&alias)?;
            let outcome = convergence.restart(&alias)?;
            info!("restart: {}", outcome_word(outcome));
        }
        Command::Stop { alias } => {
            config::validate_alias(&alias)?;
            let outcome = convergence.stop(&alias)?;
            info!("stop: {}", outcome_word(outcome));
        }
        Command::Teardown { alias } => {
            let outcome = convergence.teardown(&alias)?;
            info!("teardown: {}", outcome_word(outcome));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_word_distinguishes_change() {
        assert_eq!(outcome_word(Outcome::Changed), "changed");
        assert_eq!(outcome_word(Outcome::Unchanged), "up to date");
    }
}
