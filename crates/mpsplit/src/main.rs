use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{debug, info};

use mpsplit::{config::Config, orchestrator::BundleOrchestrator};

/// Split a mini-program into a main package and lean sub-packages
#[derive(Parser, Debug)]
#[command(name = "mpsplit", version, about)]
struct Cli {
    /// Configuration file [default: mpsplit.toml when present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mini-program source directory (holding app.json)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Output directory, cleared on every run
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Move npm packages used by a single sub-package into it
    #[arg(long)]
    split_modules: bool,

    /// Write the dependency graph and its viewer into this directory
    #[arg(long)]
    analyse_dir: Option<PathBuf>,

    /// Active business group for component replacement
    #[arg(short, long)]
    group: Option<String>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Command line flags win over the configuration file
    fn apply(self, mut config: Config) -> Config {
        if let Some(source) = self.source {
            config.source_dir = source;
        }
        if let Some(target) = self.target {
            config.target_dir = target;
        }
        if self.split_modules {
            config.split_modules = true;
        }
        if self.analyse_dir.is_some() {
            config.analyse_dir = self.analyse_dir;
        }
        if let Some(group) = self.group {
            config.group_name = group;
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let config = cli.apply(config);
    debug!("Configuration: {config:?}");

    let orchestrator = BundleOrchestrator::new(config)?;
    orchestrator.run()?;

    info!("Done");
    Ok(())
}
