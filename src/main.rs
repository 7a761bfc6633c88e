use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use claimsync::config::{ClaimsyncConfig, DEFAULT_CONFIG_FILE};

mod cmd;

#[derive(Parser)]
#[command(name = "claimsync")]
#[command(version, about = "Claims/payout state reconciler")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to claimsync.toml
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// SQLite database path. Overrides the config file and CLAIMSYNC_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and the operator API until Ctrl+C
    Serve {
        /// Port to serve on (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single reconciliation pass and print the report
    Run,
    /// Retry one payout as an operator
    Retry {
        payout_id: String,

        /// Operator bearer token
        #[arg(long, env = "CLAIMSYNC_OPERATOR_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Show recent reconciliation run reports
    Runs {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Create the database and its tables
    InitDb,
    /// Load owners, claims and payouts from a JSON fixture
    Seed { fixture: PathBuf },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration (secrets redacted)
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default claimsync.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // `config init` must work even when the existing file is broken.
    if let Commands::Config {
        command: Some(ConfigCommands::Init),
    } = &cli.command
    {
        return cmd::cmd_config_init(&cli.config);
    }

    let mut config = ClaimsyncConfig::resolve(&cli.config)?;
    if let Some(ref db_path) = cli.db_path {
        config.database.path = db_path.clone();
    }
    let _log_guard = claimsync::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { port } => cmd::cmd_serve(config, *port).await?,
        Commands::Run => cmd::cmd_run(&config).await?,
        Commands::Retry { payout_id, token } => cmd::cmd_retry(&config, payout_id, token).await?,
        Commands::Runs { limit } => cmd::cmd_runs(&config, *limit).await?,
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::Seed { fixture } => cmd::cmd_seed(&config, fixture)?,
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command.clone())?,
    }

    Ok(())
}
