//! lgd-map CLI tool
//!
//! Command-line interface for resolving a table of place names against an LGD directory.
//!
//! ## Commands
//!
//! - `seed <dataset>`: Load a directory dataset (JSON) into the SQLite reference store
//! - `levels`: List the mappable levels of the reference store
//! - `map`: Build a mapping graph from rows, resolve it, and write the session state
//! - `stats <state>`: Summarise a saved session state

use clap::{Parser, Subcommand};
use lgd_resolve::{
    builder::GraphBuilder,
    config::{ConfigProvider, MapperConfig, TomlConfigProvider},
    db::{SqliteStore, REFERENCE_DB},
    export::annotate_rows,
    orchestrator::Orchestrator,
    properties::{Hierarchy, Row},
    state::{export_state, import_state, StateMetadata},
    store::{ReferenceDataset, ReferenceStore},
    MapperError,
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(name = "lgd-map")]
#[command(
    author,
    version,
    about = "Resolve place names against the Local Government Directory",
    long_about = None
)]
struct Cli {
    /// SQLite reference database (default: the config's `database`, else lgd_reference.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a directory dataset into the reference database
    Seed {
        /// JSON file with levels, entities, edges and variations
        dataset: PathBuf,
    },

    /// List the levels a column can be mapped to
    Levels,

    /// Resolve the place columns of a table and write the session state
    Map {
        /// JSON array of row objects
        #[arg(long)]
        rows: PathBuf,

        /// Column to level assignment, as TOML or JSON
        #[arg(long)]
        hierarchy: PathBuf,

        /// Where to write the session state
        #[arg(short, long)]
        out: PathBuf,

        /// Also write the rows with their `_lgd_code`/`_lgd_name` columns
        #[arg(long)]
        annotated: Option<PathBuf>,
    },

    /// Summarise a saved session state
    Stats {
        /// State file written by `map`
        state: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TomlConfigProvider::new(path.clone()).get_config()?,
        None => MapperConfig::default(),
    };
    config.validate()?;
    let database = cli
        .database
        .clone()
        .or_else(|| config.database.clone())
        .unwrap_or_else(|| PathBuf::from(REFERENCE_DB));

    match cli.command {
        Commands::Seed { dataset } => {
            let dataset = ReferenceDataset::from_json(&fs::read_to_string(&dataset)?)?;
            let store = SqliteStore::open(&database).await?;
            store.load(&dataset).await?;
            println!(
                "Loaded {} entities into {}",
                store.entity_count().await?,
                database.display()
            );
        }

        Commands::Levels => {
            let store = SqliteStore::open(&database).await?;
            for level in store.list_levels().await? {
                println!("{:>4}  {:<24} rank {}", level.id, level.name, level.rank);
            }
        }

        Commands::Map {
            rows,
            hierarchy,
            out,
            annotated,
        } => {
            let rows: Vec<Row> = serde_json::from_str(&fs::read_to_string(&rows)?)?;
            let hierarchy = read_hierarchy(&hierarchy)?;
            let builder = GraphBuilder::new(config.key_strategy);
            let mut graph = builder.build(&rows, &hierarchy)?;

            let store = SqliteStore::open(&database).await?;
            let orchestrator = Orchestrator::from_config(store, &config)?;
            let mut last_progress = 0.0;
            orchestrator
                .map_in_batches(&mut graph, &[], |p| {
                    last_progress = p;
                    tracing::info!("mapping {:.0}% complete", p * 100.0);
                })
                .await?;

            let metadata = StateMetadata {
                columns: rows
                    .iter()
                    .flat_map(|row| row.keys().cloned())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                hierarchy: hierarchy.clone(),
                key_strategy: builder.strategy(),
                active_node: None,
                mapping_progress: Some(last_progress),
            };
            fs::write(&out, export_state(&graph, &metadata)?)?;
            println!("{}", graph.stats());
            println!("State written to {}", out.display());

            if let Some(annotated) = annotated {
                let result = annotate_rows(&rows, &hierarchy, &graph, builder.strategy())?;
                fs::write(&annotated, serde_json::to_string_pretty(&result)?)?;
                println!(
                    "{} mapped and {} unmapped rows written to {}",
                    result.mapped.len(),
                    result.unmapped.len(),
                    annotated.display()
                );
            }
        }

        Commands::Stats { state } => {
            let (graph, metadata) = import_state(&fs::read_to_string(&state)?)?;
            println!("{}", graph.stats());
            for level in graph.levels() {
                let nodes = graph.nodes_of_level(level.id);
                let matched = nodes
                    .iter()
                    .filter_map(|id| graph.node(*id))
                    .filter(|node| node.is_matched())
                    .count();
                println!("  {:<24} {matched}/{}", level.name, nodes.len());
            }
            if let Some(progress) = metadata.mapping_progress {
                println!("Last run progress: {:.0}%", progress * 100.0);
            }
        }
    }

    Ok(())
}

fn read_hierarchy(path: &Path) -> Result<Hierarchy, MapperError> {
    let content = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(serde_json::from_str(&content)?),
        _ => Ok(toml::from_str(&content)?),
    }
}
