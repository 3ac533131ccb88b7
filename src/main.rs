use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod backend;
mod bench;
mod config;
mod report;

use bench::Janitor;
use config::{BenchConfig, FileConfig, Overrides};

/// Upper bound on waiting for teardown before exiting.
const CLEANUP_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "sandbench")]
#[command(
    author,
    version,
    about = "Benchmark Sandkasten session startup against Docker containers"
)]
struct Cli {
    /// Config file (default: ./sandbench.toml, then the user config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for the report
    let default_filter = if cli.verbose {
        "sandbench=debug"
    } else {
        "sandbench=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let janitor = Janitor::new();
    let result = tokio::select! {
        result = run(cli, &janitor) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };

    if tokio::time::timeout(CLEANUP_GRACE, janitor.settle())
        .await
        .is_err()
    {
        warn!(
            "Cleanup still running after {}s, some sandboxes may be left behind",
            CLEANUP_GRACE.as_secs()
        );
    }

    result
}

async fn run(cli: Cli, janitor: &Janitor) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let file = FileConfig::load(cli.config.as_deref(), &cwd)?;
    let config = BenchConfig::resolve(file, cli.overrides)?;

    let report = bench::run(&config, janitor).await?;

    if config.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{json}");
    } else {
        print!("{}", report::render(&report));
    }
    Ok(())
}
