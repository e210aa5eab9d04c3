//! CLI entry point for the pulseboard dashboard backend.
//!
//! Covers database bootstrap, project listing, and date-range
//! reconstruction over a daily metric.

use anyhow::{Context, Result};
use pulseboard::cli::{self, Cli, Commands};
use pulseboard::data::Storage;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let db_path = cli::resolve_db_path(cli.db_path.clone());

    match cli.command {
        Commands::Init => {
            Storage::open(&db_path)
                .with_context(|| format!("failed to initialize {}", db_path.display()))?;
            println!("initialized {}", db_path.display());
        }

        Commands::Projects => {
            let storage = Storage::open(&db_path)?;
            for project in storage.list_projects()? {
                println!("{}", serde_json::to_string(&project)?);
            }
        }

        Commands::Range {
            project,
            unit,
            from,
            to,
        } => {
            let storage = Storage::open(&db_path)?;
            let from = cli::parse_date(&from)?;
            let to = match to {
                Some(raw) => cli::parse_date(&raw)?,
                None => from,
            };

            let metric = storage
                .metric_by_slugs(&project, &unit)
                .with_context(|| format!("no metric for project {project:?} and unit {unit:?}"))?;

            for (date, observation) in storage.date_range(metric.id, from, to)? {
                let entry = serde_json::json!({ "date": date, "observation": observation });
                println!("{entry}");
            }
        }
    }

    Ok(())
}
