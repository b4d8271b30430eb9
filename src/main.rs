//! fragstore CLI - versioned JSON documents over SQLite

mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fragstore::config::{self, FragstoreConfig};
use fragstore::{logging, ui, Strategy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fragstore")]
#[command(version)]
#[command(about = "Versioned document fragments over a relational store")]
#[command(long_about = r#"
fragstore keeps JSON documents as path-addressed, timestamp-versioned
fragments, or as vertices linked by edges.

Example usage:
  fragstore init
  fragstore put person 1 --document '{"name": "Alice", "age": 30}'
  fragstore get person 1 --at 2024-01-01T00:00:00Z
  fragstore find person /name Alice
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Namespace to operate in (overrides config)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Storage model: fragments or graph (overrides config)
    #[arg(short, long, global = true)]
    strategy: Option<Strategy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and create the database
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Store a document revision
    Put {
        entity: String,
        id: String,

        /// Inline JSON document
        #[arg(long, conflicts_with = "file")]
        document: Option<String>,

        /// Read the document from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Revision timestamp (RFC 3339, defaults to now)
        #[arg(long)]
        version: Option<DateTime<Utc>>,

        /// Outgoing link as `name=entity/id` (graph strategy)
        #[arg(short, long = "link", value_parser = commands::parse_link)]
        links: Vec<commands::LinkArg>,
    },

    /// Read a document at a point in time
    Get {
        entity: String,
        id: String,

        /// Snapshot timestamp (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Show the stored fragments instead of the document
        #[arg(long)]
        fragments: bool,
    },

    /// List the revisions of a document
    History {
        entity: String,
        id: String,

        /// Exclusive lower bound; the revision live at this time is included
        #[arg(long)]
        after: Option<DateTime<Utc>>,

        /// Exclusive upper bound
        #[arg(long)]
        before: Option<DateTime<Utc>>,

        /// Maximum number of fragment rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List the documents of an entity type
    List {
        entity: String,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Find documents holding a value at a path
    Find {
        entity: String,

        /// Fragment path, e.g. `/tags[0]` or `/tags[]` for any element
        path: String,

        value: String,

        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Maximum number of documents
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete a document
    Delete {
        entity: String,
        id: String,

        /// Tombstone timestamp (defaults to now)
        #[arg(long)]
        version: Option<DateTime<Utc>>,

        /// Remove every stored revision instead of writing a tombstone
        #[arg(long)]
        purge: bool,
    },

    /// Show the links of a document
    Links {
        entity: String,
        id: String,

        /// Show links pointing at the document instead
        #[arg(long)]
        incoming: bool,
    },
}

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputMode::Human)
    }
}

/// Print a JSON envelope for a successful command
pub fn emit_success(mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<FragstoreConfig> {
    let mut config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    config.apply_env();
    if let Some(database) = &cli.database {
        config.database = Some(database.clone());
    }
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    if config.database.is_none() {
        config.database = Some(config::default_database_path_in(&std::env::current_dir()?));
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Init { force } => {
            let path = cli.config.clone().unwrap_or_else(config::default_config_path);
            commands::run_init(mode, &path, &config, force)
        }
        Commands::Put { entity, id, document, file, version, links } => {
            let document = commands::read_document_arg(document, file)?;
            commands::run_put(mode, &config, &entity, &id, &document, version.unwrap_or_else(Utc::now), &links)
        }
        Commands::Get { entity, id, at, fragments } => {
            commands::run_get(mode, &config, &entity, &id, at.unwrap_or_else(Utc::now), fragments)
        }
        Commands::History { entity, id, after, before, limit } => {
            commands::run_history(mode, &config, &entity, &id, after, before, limit)
        }
        Commands::List { entity, at } => commands::run_list(mode, &config, &entity, at.unwrap_or_else(Utc::now)),
        Commands::Find { entity, path, value, at, limit } => {
            commands::run_find(mode, &config, &entity, &path, &value, at.unwrap_or_else(Utc::now), limit)
        }
        Commands::Delete { entity, id, version, purge } => {
            commands::run_delete(mode, &config, &entity, &id, version.unwrap_or_else(Utc::now), purge)
        }
        Commands::Links { entity, id, incoming } => commands::run_links(mode, &config, &entity, &id, incoming),
    }
}

fn main() {
    let cli = Cli::parse();
    logging::initialize_once(cli.verbose);
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            let envelope = serde_json::json!({ "ok": false, "error": format!("{:#}", e) });
            println!("{}", envelope);
        } else {
            ui::error(&format!("{:#}", e));
        }
        std::process::exit(1);
    }
}
