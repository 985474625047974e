//! Run example:
//!
//! cargo run --release -- run.yaml
//!
//! Distributed:
//!
//! cargo mpirun --np 4 --features mpi --bin viscoturb --release -- run.yaml
//!
//! Important: Disable obenblas multithreading:
//! ```text
//! export OPENBLAS_NUM_THREADS=1
//! ```
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use viscoturb::analysis::merge_all;
use viscoturb::config::Config;
use viscoturb::domain::{Domain, ProcessMesh};
use viscoturb::viscoelastic::{run, RunSummary, HANDLERS};

/// Spectral solver for two-dimensional viscoelastic turbulence
#[derive(Parser)]
#[command(name = "viscoturb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Oldroyd-B Kolmogorov flow in a doubly periodic box", long_about = None)]
struct Cli {
    /// Run configuration (yaml)
    config: PathBuf,

    /// Process mesh `p0,p1` (a single `p` means `p,1`)
    #[arg(long)]
    mesh: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", value_parser = parse_level)]
    log_level: Level,

    /// Only merge the output found below `run.data_dir`
    #[arg(long)]
    merge_only: bool,
}

fn parse_level(s: &str) -> Result<Level, String> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "unknown log level `{}` (expected trace, debug, info, warn or error)",
            s
        )),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("invalid configuration {:?}", cli.config))?;
    let mesh = cli
        .mesh
        .as_deref()
        .map(str::parse::<ProcessMesh>)
        .transpose()
        .context("invalid --mesh")?
        .map(|m| m.shape);

    if cli.merge_only {
        let results = merge_all(HANDLERS.iter().map(|h| config.run.data_dir.join(h)));
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            anyhow::bail!("{} of {} merges failed", failed, results.len());
        }
        return Ok(());
    }

    let summary = execute(&config, mesh)?;
    if summary.failed_merges() > 0 {
        anyhow::bail!(
            "{} of {} merges failed",
            summary.failed_merges(),
            summary.merges.len()
        );
    }
    Ok(())
}

#[cfg(not(feature = "mpi"))]
fn execute(config: &Config, mesh: Option<[usize; 2]>) -> anyhow::Result<RunSummary> {
    let domain = Domain::build(config.params.nx, config.params.ny, mesh)?;
    Ok(run(config, &domain)?)
}

#[cfg(feature = "mpi")]
fn execute(config: &Config, mesh: Option<[usize; 2]>) -> anyhow::Result<RunSummary> {
    use viscoturb::domain::fourier_mpi::initialize;
    let universe = initialize().context("mpi initialization failed")?;
    let domain = Domain::build_mpi(&universe, config.params.nx, config.params.ny, mesh)?;
    Ok(run(config, &domain)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_is_case_insensitive() {
        let cli = Cli::try_parse_from(["viscoturb", "run.yaml", "--log-level", "DEBUG"]).unwrap();
        assert_eq!(cli.log_level, Level::DEBUG);
        let cli = Cli::try_parse_from(["viscoturb", "run.yaml"]).unwrap();
        assert_eq!(cli.log_level, Level::INFO);
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        assert!(parse_level("verbose").is_err());
        assert!(Cli::try_parse_from(["viscoturb", "run.yaml", "--log-level", "verbose"]).is_err());
    }
}
