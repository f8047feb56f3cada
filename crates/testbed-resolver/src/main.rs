//! testbed-resolver: command-line front end.
//!
//! Loads a declaration file, decides which scenario runs on which setup and
//! prints the resulting variations.
//!
//! # Usage
//!
//! ```text
//! testbed-resolver <DECLARATIONS> [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Resolver configuration file (TOML)
//!   --show-discarded         Also report rejected mappings with their reasons
//!   --format <text|json>     Report format [default: text]
//!   --log-level <LEVEL>      Log filter used when RUST_LOG is unset
//!   --write-config <PATH>    Write the effective configuration to PATH
//! ```
//!
//! Flags override the configuration file, which overrides the defaults.
//!
//! # Exit status
//!
//! Non-zero when the configuration or declaration file cannot be loaded, or
//! when the declarations violate the specialization rules.  Scenario/setup
//! pairs that cannot be matched are not errors; they are reported as not
//! applicable.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, info_span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use testbed_resolver::application::matching::resolve_all;
use testbed_resolver::application::ResolutionSession;
use testbed_resolver::infrastructure::collector::load_declarations;
use testbed_resolver::infrastructure::report::{build_report, render};
use testbed_resolver::infrastructure::storage::config::{
    load_config, save_config, OutputFormat, ResolverConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Matches test scenarios against test setups.
#[derive(Debug, Parser)]
#[command(
    name = "testbed-resolver",
    about = "Resolves which test scenarios can run on which test setups",
    version
)]
struct Cli {
    /// Declaration file (TOML) with capabilities, scenarios and setups.
    declarations: PathBuf,

    /// Resolver configuration file.
    #[arg(long, env = "TESTBED_RESOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// Include discarded variations and their reasons in the report.
    #[arg(long)]
    show_discarded: bool,

    /// Report format.
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Log filter used when `RUST_LOG` is unset (e.g. `debug`).
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective configuration to this path.
    #[arg(long)]
    write_config: Option<PathBuf>,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, mut config: ResolverConfig) -> ResolverConfig {
        if self.show_discarded {
            config.resolver.show_discarded = true;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(level) = &self.log_level {
            config.resolver.log_level = level.clone();
        }
        config
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = load_config(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;
    let config = cli.apply(file_config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.resolver.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &cli.write_config {
        save_config(path, &config)
            .with_context(|| format!("failed to write configuration to {}", path.display()))?;
        info!("configuration written to {}", path.display());
    }

    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id);
    let _guard = span.enter();

    let graph = load_declarations(&cli.declarations)
        .with_context(|| format!("failed to load declarations from {}", cli.declarations.display()))?;
    info!(
        "loaded {} containers and {} capabilities from {}",
        graph.containers().len(),
        graph.capabilities().len(),
        cli.declarations.display()
    );

    let mut session = ResolutionSession::new(&graph);
    let resolutions = resolve_all(&mut session).context("declaration hierarchy is invalid")?;

    let report = build_report(&mut session, run_id, &resolutions, config.resolver.show_discarded);
    let rendered = render(&report, config.output.format).context("failed to render report")?;
    println!("{rendered}");

    let applicable = resolutions.iter().filter(|r| r.is_applicable()).count();
    info!("{applicable} of {} pair(s) applicable", resolutions.len());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
