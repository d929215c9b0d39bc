//! syncctl - command-line front end for the session-sync core.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sync_config_and_utils::{init_logging, Config, Paths};
use sync_runtime::SyncRuntime;
use tracing::debug;

/// syncctl - Sign in, inspect the dashboard and watch live feeds.
#[derive(Parser)]
#[command(name = "syncctl")]
#[command(about = "Session and live data sync client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory for config, credentials and logs (default: ~/.session-sync)
    #[arg(long, global = true, env = "SYNC_BASE_DIR")]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session token
    Login {
        /// Email or username; prompted when omitted
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Create an account
    Register {
        /// Display name; prompted when omitted
        #[arg(short, long)]
        name: Option<String>,
        /// Email or username; prompted when omitted
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Log out and clear the stored token
    Logout,

    /// Verify the stored session with the server
    Status,

    /// Show the dashboard
    Dashboard {
        /// Keep polling and print every new snapshot
        #[arg(short, long)]
        watch: bool,
    },

    /// Follow a live collection or document
    Watch {
        /// Collection or document path, e.g. `products` or `products/p1`
        path: String,
        /// Filter as `field op value`, e.g. `--where "stock < 5"`
        #[arg(long = "where", value_name = "FILTER")]
        filters: Vec<String>,
        /// Order by a field; append `:desc` for descending order
        #[arg(long)]
        order_by: Option<String>,
        /// Maximum number of records
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(dir) => Paths::with_base_dir(dir),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&paths, &config.log_level, false);
    debug!(base_dir = %paths.base_dir().display(), "Starting syncctl");

    let runtime = SyncRuntime::from_config(config, &paths)?;
    let format = cli.format;

    match cli.command {
        Commands::Login { identifier } => commands::login(&runtime, identifier, &format).await,
        Commands::Register { name, identifier } => {
            commands::register(&runtime, name, identifier, &format).await
        }
        Commands::Logout => commands::logout(&runtime, &format),
        Commands::Status => commands::status(&runtime, &format).await,
        Commands::Dashboard { watch } => commands::dashboard(&runtime, watch, &format).await,
        Commands::Watch {
            path,
            filters,
            order_by,
            limit,
        } => {
            let constraints = commands::parse_constraints(&filters, order_by.as_deref(), limit)?;
            commands::watch(&runtime, &path, constraints, &format).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn watch_accepts_repeated_filters() {
        let cli = Cli::try_parse_from([
            "syncctl",
            "watch",
            "products",
            "--where",
            "stock < 5",
            "--where",
            "active == true",
            "--limit",
            "10",
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Watch {
                path,
                filters,
                limit,
                ..
            } => {
                assert_eq!(path, "products");
                assert_eq!(filters.len(), 2);
                assert_eq!(limit, Some(10));
            }
            _ => panic!("expected watch"),
        }
        assert!(matches!(cli.format, output::OutputFormat::Json));
    }
}
