//! threadlab - command-line front end for the thread resolution engine
//!
//! Every command opens the SQLite database under the root folder, runs one
//! engine operation and prints its result as JSON on stdout. Logs go to
//! stderr.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use threadlab_common::config::{database_path, load_toml_config, resolve_root_folder, TomlConfig};
use threadlab_engine::import::MappingEntry;
use threadlab_engine::{
    resolve_containers, AnnotationWrite, ColumnMapping, RawRow, ResolutionService, SqliteStore,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for threadlab
#[derive(Parser, Debug)]
#[command(name = "threadlab")]
#[command(about = "Resolve conversation turns into threads from annotations and reply links")]
#[command(version)]
struct Args {
    /// Root folder holding the database (overrides THREADLAB_ROOT)
    #[arg(short, long, global = true)]
    root_folder: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import rows from a JSON array of objects
    Import {
        /// Target container
        #[arg(long)]
        container: String,
        /// JSON file: array of `{column: value}` objects
        #[arg(long)]
        rows: PathBuf,
        /// JSON file: `{target_field: column}` or `{target_field: {column, default_value}}`
        #[arg(long)]
        mapping: PathBuf,
        /// Recorded as the creator of seeded annotations
        #[arg(long, default_value = "import")]
        created_by: String,
    },

    /// Append a manual thread annotation
    Annotate {
        #[arg(long)]
        container: String,
        #[arg(long)]
        turn: String,
        #[arg(long)]
        thread: String,
        #[arg(long)]
        created_by: String,
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Resolve one or more containers in parallel
    Resolve {
        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Resolve a container and print its turns grouped by thread
    Project {
        #[arg(long)]
        container: String,
        /// Print the winning annotations per thread instead
        #[arg(long)]
        annotations: bool,
    },
}

fn init_tracing(config: &TomlConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("threadlab_engine={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cell text for a JSON value; null reads as a blank cell
fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn read_rows(path: &Path) -> Result<Vec<RawRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rows file {}", path.display()))?;
    let objects: Vec<serde_json::Map<String, Value>> = serde_json::from_str(&text)
        .with_context(|| format!("Rows file {} is not a JSON array of objects", path.display()))?;
    Ok(objects
        .into_iter()
        .map(|object| object.into_iter().map(|(k, v)| (k, cell_text(v))).collect())
        .collect())
}

fn read_mapping(path: &Path) -> Result<ColumnMapping> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
    let entries: BTreeMap<String, MappingEntry> = serde_json::from_str(&text)
        .with_context(|| format!("Mapping file {} is not a JSON object", path.display()))?;
    Ok(ColumnMapping::from_entries(entries)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_toml_config(args.config.as_deref()).context("Failed to load config")?;
    init_tracing(&config);

    info!(
        "Starting threadlab {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    let db_path = database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let store = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .context("Failed to open database")?,
    );
    let settings = config.engine.clone();

    match args.command {
        Command::Import {
            container,
            rows,
            mapping,
            created_by,
        } => {
            let rows = read_rows(&rows)?;
            let mapping = read_mapping(&mapping)?;
            let service = ResolutionService::new(store, settings.clone())?;
            let outcome = service
                .import(&container, &rows, &mapping, &created_by)
                .await?;
            print_json(&outcome.report(settings.report_message_limit))?;
        }
        Command::Annotate {
            container,
            turn,
            thread,
            created_by,
            confidence,
            notes,
        } => {
            let mut write =
                AnnotationWrite::new(turn, thread, created_by).with_confidence(confidence);
            if let Some(notes) = notes {
                write = write.with_notes(notes);
            }
            let service = ResolutionService::new(store, settings)?;
            let annotation = service.write_annotation(&container, write).await?;
            print_json(&annotation)?;
        }
        Command::Resolve { containers } => {
            let resolutions = resolve_containers(store, containers, &settings).await?;
            print_json(&resolutions)?;
        }
        Command::Project {
            container,
            annotations,
        } => {
            let service = ResolutionService::new(store, settings)?;
            if annotations {
                service.load_container(&container).await?;
                print_json(&service.annotation_listing(&container).await?)?;
            } else {
                service.resolve_full(&container).await?;
                print_json(&service.project(&container).await?)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_rows_keeps_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        std::fs::write(&path, r#"[{"text": "hi", "id": "t1", "parent": null, "seq": 3}]"#).unwrap();

        let rows = read_rows(&path).unwrap();
        let columns: Vec<&str> = rows[0].columns().collect();
        assert_eq!(columns, vec!["text", "id", "parent", "seq"]);
        assert_eq!(rows[0].get("parent"), Some(""));
        assert_eq!(rows[0].get("seq"), Some("3"));
    }
}
