//! Command-line interface argument parsing for pulseboard.
//!
//! - `pulseboard init` — create the dashboard database
//! - `pulseboard projects` — list projects and their API keys
//! - `pulseboard range --project site --unit page-views --from 2024-01-01`

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Metrics-dashboard backend over a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "pulseboard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the dashboard database file
    /// Defaults to $PULSEBOARD_DIR/pulseboard.db or ~/.local/share/pulseboard/pulseboard.db
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and apply the schema
    Init,

    /// List projects with their API keys
    Projects,

    /// Reconstruct a daily metric over an inclusive date range
    Range {
        /// Project slug
        #[arg(short, long)]
        project: String,

        /// Unit slug; together with the project this identifies the metric
        #[arg(short, long)]
        unit: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// End date (YYYY-MM-DD); defaults to the start date
        #[arg(long)]
        to: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

/// Parse a YYYY-MM-DD argument
pub fn parse_date(raw: &str) -> anyhow::Result<NaiveDate> {
    raw.parse()
        .map_err(|err| anyhow::anyhow!("invalid date {raw:?} (expected YYYY-MM-DD): {err}"))
}

/// Resolve the database file: explicit flag, then the PULSEBOARD_DIR
/// environment variable, then a home-directory default.
pub fn resolve_db_path(flag: Option<String>) -> std::path::PathBuf {
    flag.map(std::path::PathBuf::from).unwrap_or_else(|| {
        let dir = if let Ok(dir) = std::env::var("PULSEBOARD_DIR") {
            std::path::PathBuf::from(dir)
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".local")
                .join("share")
                .join("pulseboard")
        };
        dir.join("pulseboard.db")
    })
}
