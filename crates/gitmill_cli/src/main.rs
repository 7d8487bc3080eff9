//! gitmill CLI - runs repository workers and manages the schema.

mod commands;
mod config;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use console::Term;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitmill")]
#[command(version)]
#[command(about = "Turn git history into activity events")]
#[command(
    long_about = "gitmill claims repositories from a shared registry, clones just enough \
history to cover new commits, derives authorship, commit and trailer activities \
from every commit, and publishes them to a message broker."
)]
#[command(after_long_help = r#"EXAMPLES
    Create or upgrade the schema:
        $ gitmill migrate up

    Run a worker until Ctrl+C:
        $ gitmill run

    Process a single repository and exit:
        $ gitmill run --once

    Mine without a broker, discarding activities:
        $ gitmill run --once --dry-run

    Generate shell completions:
        $ gitmill completions bash > ~/.local/share/bash-completion/completions/gitmill

CONFIGURATION
    gitmill reads configuration from:
      1. ~/.config/gitmill/config.toml (or $XDG_CONFIG_HOME/gitmill/config.toml)
      2. ./gitmill.toml
      3. Environment variables (GITMILL_* prefix, `__` between section and key)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    GITMILL_DATABASE__URL           Database connection string (default: ~/.local/state/gitmill/gitmill.db)
    GITMILL_TENANT__ID              Tenant UUID stamped on every activity
    GITMILL_QUEUE__REDIS_URL        Redis broker URL
    GITMILL_MAINTAINER__CLASSIFIER_URL
                                    Maintainer classifier endpoint
    RUST_LOG                        Log filter (default: gitmill=info,gitmill_cli=info)
"#)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Run a repository worker
    Run {
        /// Process at most one repository, then exit
        #[arg(long)]
        once: bool,
        /// Keep activities in memory instead of publishing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

fn init_tracing(format: LogFormat) {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("gitmill=info,gitmill_cli=info"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder
            .with_ansi(Term::stderr().is_term())
            .with_target(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Handle commands that don't require configuration first
    match &cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(*shell)?;
            return Ok(());
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output.clone())?;
            return Ok(());
        }
        _ => {}
    }

    init_tracing(cli.log_format);

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load()?;

    let database_url = config
        .database_url()
        .ok_or("could not determine a database URL; set GITMILL_DATABASE__URL")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    match cli.command {
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Run { once, dry_run } => {
            commands::run::handle_run(&config, database_url, once, dry_run).await?;
        }
        Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(())
}
