//! facetq CLI
//!
//! Command-line interface for:
//! - Serving the query catalog over HTTP (`serve`)
//! - Listing the catalog (`shapes`)
//! - Inspecting and running catalog queries against SQLite (`explain`, `run`)
//! - Listing classification rows under themes (`search`)
//! - Creating and seeding a database (`init-db`)
//! - Evaluating queries against a JSON fixture without a database (`eval`)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use facetq_core::{catalog, lookup, FactSnapshot, QueryEngine, Store};
use facetq_store_sqlite::SqliteStore;

mod config;
mod server;
mod session;

use config::FacetqConfig;
use session::{SessionGate, StaticSessionGate};

#[derive(Parser)]
#[command(name = "facetq")]
#[command(author, version, about = "facetq: faceted hierarchical query engine")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "FACETQ_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the configuration)
    #[arg(long, global = true, env = "FACETQ_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen address (overrides the configuration)
        #[arg(long, env = "FACETQ_LISTEN")]
        listen: Option<SocketAddr>,
    },

    /// List the query catalog
    Shapes {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the statement and bindings a request lowers to
    Explain {
        /// Shape id (see `facetq shapes`)
        shape: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Execute a catalog query against the database
    Run {
        shape: String,

        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// List classification rows under themes (theme_ids, include_desc,
    /// facets, structure_id)
    Search {
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Create the schema, optionally loading a JSON fixture
    InitDb {
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Evaluate a catalog query in memory against a JSON fixture
    Eval {
        shape: String,

        #[arg(long)]
        fixture: PathBuf,

        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = FacetqConfig::load(cli.config.as_deref())?.with_database(cli.database);

    match cli.command {
        Commands::Serve { listen } => cmd_serve(config.with_listen(listen)),
        Commands::Shapes { json } => cmd_shapes(json),
        Commands::Explain { shape, params } => cmd_explain(&config, &shape, &params),
        Commands::Run { shape, params } => cmd_run(&config, &shape, &params),
        Commands::Search { params } => cmd_search(&config, &params),
        Commands::InitDb { fixture } => cmd_init_db(&config, fixture.as_deref()),
        Commands::Eval {
            shape,
            fixture,
            params,
        } => cmd_eval(&shape, &fixture, &params),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))
}

fn parse_params(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow!("--params is not valid JSON: {e}"))
}

async fn open_engine(config: &FacetqConfig) -> Result<QueryEngine> {
    let store = SqliteStore::open(&config.database)?;
    let engine = QueryEngine::open(Arc::new(store), config.schema.clone()).await?;
    Ok(engine)
}

fn cmd_serve(config: FacetqConfig) -> Result<()> {
    if config.users.is_empty() {
        tracing::warn!("no users configured; every login will be rejected");
    }
    runtime()?.block_on(async move {
        let engine = open_engine(&config).await?;
        let sessions: Arc<dyn SessionGate> = Arc::new(StaticSessionGate::new(
            config.users.clone(),
            config.session_ttl_minutes,
        ));
        let state = Arc::new(server::ServerState { engine, sessions });
        server::serve(config.listen, state).await
    })
}

fn cmd_shapes(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(catalog())?);
        return Ok(());
    }
    for decl in catalog() {
        println!("{}  {}", decl.id.green().bold(), decl.label.dimmed());
        for param in decl.params {
            println!("    {:<22} {}", param.name.cyan(), param.ty);
        }
    }
    Ok(())
}

fn cmd_explain(config: &FacetqConfig, shape: &str, params: &str) -> Result<()> {
    let payload = parse_params(params)?;
    runtime()?.block_on(async {
        let engine = open_engine(config).await?;
        let prepared = engine.prepare(shape, &payload)?;
        println!("{} {}", "shape:".bold(), prepared.shape.id());
        match prepared.statement {
            Some(statement) => {
                println!("{}\n{}", "statement:".bold(), statement.text);
                println!("{}", "bindings:".bold());
                for (name, value) in &statement.params {
                    println!("    :{:<20} {}", name.cyan(), value);
                }
            }
            None => println!("{}", "empty selection: no statement is issued".yellow()),
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_run(config: &FacetqConfig, shape: &str, params: &str) -> Result<()> {
    let payload = parse_params(params)?;
    runtime()?.block_on(async {
        let engine = open_engine(config).await?;
        let rows = engine.execute(shape, &payload).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        eprintln!("{} {}", rows.len().to_string().green(), "rows".dimmed());
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_search(config: &FacetqConfig, params: &str) -> Result<()> {
    let payload = parse_params(params)?;
    runtime()?.block_on(async {
        let engine = open_engine(config).await?;
        let rows = engine.search_classifications(&payload).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        eprintln!("{} {}", rows.len().to_string().green(), "rows".dimmed());
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_init_db(config: &FacetqConfig, fixture: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(&config.database)?;
    store.bootstrap(&config.schema)?;
    println!("{} {}", "initialized".green(), config.database.display());

    if let Some(path) = fixture {
        let snapshot = read_fixture(path)?;
        let taxonomy = snapshot.taxonomy()?;
        tracing::debug!(nodes = taxonomy.len(), "fixture taxonomy checked");
        let counts = store.load_fixture(&config.schema, &snapshot)?;
        println!(
            "loaded {} nodes, {} entities, {} classifications",
            counts.nodes, counts.entities, counts.classifications
        );
    }

    // Read the taxonomy back through the configured names.
    runtime()?.block_on(async {
        let rows = store
            .run_query(&facetq_core::TaxonomyIndex::load_statement(&config.schema))
            .await?;
        tracing::debug!(nodes = rows.len(), "taxonomy readable");
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_eval(shape: &str, fixture: &Path, params: &str) -> Result<()> {
    let payload = parse_params(params)?;
    let snapshot = read_fixture(fixture)?;
    let taxonomy = snapshot.taxonomy()?;
    let decl = lookup(shape).ok_or_else(|| anyhow!("unknown query shape: {shape}"))?;
    let predicate = decl.kind.parse(&payload)?.plan(&taxonomy);
    let rows = snapshot.evaluate(&predicate);
    println!("{}", serde_json::to_string_pretty(&rows)?);
    eprintln!("{} {}", rows.len().to_string().green(), "rows".dimmed());
    Ok(())
}

fn read_fixture(path: &Path) -> Result<FactSnapshot> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read fixture {}: {e}", path.display()))?;
    FactSnapshot::from_json(&text).map_err(|e| anyhow!("invalid fixture {}: {e}", path.display()))
}
