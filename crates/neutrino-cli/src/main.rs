//! Command-line entry point. `start` and `resume` drive the orchestrator;
//! `compare`, `sim`, and `worker` are accepted as real subcommands but are
//! out of scope for this build and exit non-zero.

mod logging;

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use logging::{init_logging, LogArgs};
use neutrino_orchestrator::MigrationContext;
use neutrino_types::ResolvedConfig;

#[derive(Debug, Parser)]
#[command(name = "neutrino", author, version, about = "Document-database cluster migration tool")]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
#[command(rename_all = "kebab-case")]
enum Subcommand {
    /// Start a fresh migration from the given configuration document
    Start(ConfigArgs),
    /// Resume a previously started migration, reusing its workspace
    Resume(ConfigArgs),
    /// Compare source and target collections after a migration
    Compare(ConfigArgs),
    /// Replay captured production traffic against the target
    Sim(ConfigArgs),
    /// Run a single detached worker against an existing workspace
    Worker(ConfigArgs),
}

#[derive(Debug, clap::Args)]
struct ConfigArgs {
    /// Path to the migration configuration document
    config: PathBuf,
}

impl Subcommand {
    fn config_path(&self) -> &PathBuf {
        match self {
            Subcommand::Start(args)
            | Subcommand::Resume(args)
            | Subcommand::Compare(args)
            | Subcommand::Sim(args)
            | Subcommand::Worker(args) => &args.config,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Loaded before logging so the config document's `verbose` flag can
    // drive the default level when `--log.level` isn't given explicitly.
    let config = load_config(cli.subcommand.config_path());
    let verbose = config.as_ref().map(|c| c.verbose).unwrap_or(false);
    init_logging(&cli.log, verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let result = runtime.block_on(run(cli.subcommand, config));
    if let Err(err) = &result {
        tracing::error!(error = ?err, "migration failed");
    }
    result
}

async fn run(subcommand: Subcommand, config: anyhow::Result<ResolvedConfig>) -> anyhow::Result<()> {
    match subcommand {
        Subcommand::Start(_) => {
            let ctx = establish(config?).await?;
            confirm_drop(&ctx)?;
            install_interrupt_handler(&ctx);
            neutrino_orchestrator::run_start(&ctx).await?;
        }
        Subcommand::Resume(_) => {
            let ctx = establish(config?).await?;
            install_interrupt_handler(&ctx);
            neutrino_orchestrator::run_resume(&ctx).await?;
        }
        Subcommand::Compare(_) | Subcommand::Sim(_) | Subcommand::Worker(_) => {
            tracing::error!("this subcommand is not implemented in this build");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn establish(config: ResolvedConfig) -> anyhow::Result<MigrationContext> {
    tracing::info!(port = config.port, "progress HTTP server is not implemented in this build; the configured port would be bound here");
    MigrationContext::establish(config)
        .await
        .context("failed to establish the migration context")
}

fn load_config(path: &PathBuf) -> anyhow::Result<ResolvedConfig> {
    let path_str = path.to_string_lossy();
    let raw = neutrino_types::config::load_from_file(&path_str)
        .with_context(|| format!("failed to load configuration from {path_str}"))?;
    neutrino_types::config::validate(raw).context("invalid configuration")
}

/// Honors the config document's `drop` + `yes` pair: a destructive drop run
/// interactively without `"yes": true` must be confirmed at the terminal;
/// non-interactively (no tty on stdin) it is refused outright.
fn confirm_drop(ctx: &MigrationContext) -> anyhow::Result<()> {
    if !ctx.config.drop || ctx.config.yes {
        return Ok(());
    }
    if !atty::is(atty::Stream::Stdin) {
        anyhow::bail!(
            "refusing to drop target collections on a non-interactive terminal without \"yes\": true in the configuration"
        );
    }
    eprint!("This will drop existing collections on the target cluster. Continue? [y/N] ");
    use std::io::Write;
    std::io::stderr().flush().ok();
    let mut input = String::new();
    std::io::stdin().read_line(&mut input).context("failed to read confirmation from stdin")?;
    if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
        anyhow::bail!("migration aborted by operator");
    }
    Ok(())
}

/// Spawns the Ctrl+C listener that flips the shared exit flag; workers and
/// followers check it between units of work, so shutdown happens once the
/// unit in flight finishes rather than mid-write.
fn install_interrupt_handler(ctx: &MigrationContext) {
    let exit = ctx.exit.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received interrupt, finishing in-flight work and shutting down");
            exit.store(true, Ordering::Relaxed);
        }
    });
}
