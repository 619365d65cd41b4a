use clap::{Parser, Subcommand};
use rag_store::commands::{
    create_collection, describe_failure, list_collections, list_sources, load_config, search,
    sync_source,
};
use rag_store::config::{get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-store")]
#[command(about = "Document and vector storage with incremental ingestion from knowledge sources")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and local databases
    #[arg(long, global = true, env = "RAG_STORE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure storage backends, Ollama and sources
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Manage logical collections
    Collections {
        #[command(subcommand)]
        command: CollectionsCommand,
    },
    /// List configured knowledge sources
    Sources,
    /// Incrementally sync a knowledge source into a collection
    Sync {
        /// Name of the knowledge source
        source: String,
        /// Target collection, defaults to storage.default_collection
        #[arg(long)]
        collection: Option<String>,
    },
    /// Search a collection by semantic similarity
    Search {
        collection: String,
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum CollectionsCommand {
    /// List all collections
    List,
    /// Create a collection with explicit attributes
    Create {
        name: String,
        /// Collection type, "generic" when omitted
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}", describe_failure(&e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&load_config(&config_dir)?)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Collections { command } => {
            let config = load_config(&config_dir)?;
            match command {
                CollectionsCommand::List => list_collections(&config).await?,
                CollectionsCommand::Create {
                    name,
                    kind,
                    description,
                } => create_collection(&config, name, kind, description).await?,
            }
        }
        Commands::Sources => {
            list_sources(&load_config(&config_dir)?).await?;
        }
        Commands::Sync { source, collection } => {
            sync_source(&load_config(&config_dir)?, &source, collection).await?;
        }
        Commands::Search {
            collection,
            query,
            limit,
        } => {
            search(&load_config(&config_dir)?, &collection, &query, limit).await?;
        }
    }

    Ok(())
}
