//! # knowledge-sync CLI (`ksync`)
//!
//! ## Usage
//!
//! ```bash
//! ksync --config ./config/ksync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ksync init` | Create the SQLite ledger and run schema migrations |
//! | `ksync sources` | Show configured sources and credentials |
//! | `ksync sync <issue\|page\|all>` | Run one incremental sync |
//! | `ksync status` | Ledger counts, watermarks, and parked items |
//! | `ksync requeue <type> <id>` | Give a parked item a fresh failure budget |
//! | `ksync serve` | Start the HTTP trigger server |
//! | `ksync serve --schedule` | Server plus the daily scheduler, sharing one run lock |
//! | `ksync schedule` | Run `sync all` daily at `[schedule]` time |
//! | `ksync completions <shell>` | Print shell completions |

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use knowledge_sync::{config, logging, migrate, scheduler, server, sources, status, sync_cmd};

/// knowledge-sync: incremental Jira and Confluence sync into a Dify
/// knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ksync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ksync",
    about = "Incremental sync of Jira issues and Confluence pages into a Dify knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ksync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List configured sources and whether credentials are present.
    Sources,

    /// Run one incremental sync.
    ///
    /// Retries pending items first, then fetches everything modified since
    /// the watermark and creates or updates knowledge-base documents.
    Sync {
        /// `issue`, `page`, or `all`.
        target: String,
    },

    /// Show ledger counts, watermarks, and permanently failed items.
    ///
    /// With `--source-type` or `--status`, lists matching items instead.
    Status {
        /// Filter by source type (`issue` or `page`).
        #[arg(long)]
        source_type: Option<String>,

        /// Filter by status (`synced`, `pending_retry`, `failed_permanent`).
        #[arg(long)]
        status: Option<String>,
    },

    /// Move a failed_permanent item back into the retry queue.
    Requeue {
        /// `issue` or `page`.
        source_type: String,
        /// Jira issue key or Confluence page id.
        source_id: String,
    },

    /// Start the HTTP trigger server on `[server].bind`.
    Serve {
        /// Also run the daily scheduler in this process, sharing the run lock.
        #[arg(long)]
        schedule: bool,
    },

    /// Run `sync all` every day at `[schedule] hour:minute` local time.
    Schedule,

    /// Print shell completion script to stdout.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ksync", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Sync { target } => {
            sync_cmd::run_sync(&cfg, &target).await?;
        }
        Commands::Status {
            source_type,
            status: status_filter,
        } => {
            status::run_status(&cfg, source_type, status_filter).await?;
        }
        Commands::Requeue {
            source_type,
            source_id,
        } => {
            status::run_requeue(&cfg, &source_type, &source_id).await?;
        }
        Commands::Serve { schedule } => {
            server::run_server(&cfg, schedule).await?;
        }
        Commands::Schedule => {
            scheduler::run_scheduler(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
