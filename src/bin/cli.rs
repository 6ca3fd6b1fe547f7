//! Nebula CLI
//!
//! Command-line access to collections, memories and search.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nebula::client::DEFAULT_LIST_LIMIT;
use nebula::config::DEFAULT_BASE_URL;
use nebula::{
    load_file, BlockingNebula, ClientConfig, ListOptions, Memory, MemoryContent, SearchOptions,
};

#[derive(Parser)]
#[command(name = "nebula")]
#[command(about = "Nebula memory API CLI")]
#[command(version)]
struct Cli {
    /// API key or bearer token
    #[arg(long, env = "NEBULA_API_KEY", hide_env_values = true)]
    api_key: String,

    /// API base URL
    #[arg(long, env = "NEBULA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Request timeout in seconds
    #[arg(long, env = "NEBULA_TIMEOUT_SECS", default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Store a memory
    Store {
        /// Collection id or name
        collection: String,
        /// Text content (omit when using --file)
        content: Option<String>,
        /// Attach a local image, audio or document file
        #[arg(short, long)]
        file: Option<String>,
        /// Speaker role; makes this a conversation message
        #[arg(short, long)]
        role: Option<String>,
        /// Append to an existing memory
        #[arg(short, long)]
        memory_id: Option<String>,
        /// Authority score (0-1)
        #[arg(short, long)]
        authority: Option<f64>,
    },
    /// Get a memory by ID
    Get {
        /// Memory ID
        id: String,
    },
    /// List memories in a collection
    List {
        /// Collection ids (comma-separated)
        collections: String,
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },
    /// Search memories
    Search {
        /// Search query
        query: String,
        /// Collection ids or names (comma-separated)
        #[arg(short, long)]
        collections: Option<String>,
        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Delete a memory
    Delete {
        /// Memory ID
        id: String,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// List collections
    List {
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },
    /// Create a collection
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a collection
    Delete { id: String },
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::new(cli.api_key)?
        .with_base_url(cli.base_url)
        .with_timeout(Duration::from_secs(cli.timeout));
    let client = BlockingNebula::new(config)?;

    match cli.command {
        Commands::Health => print_json(&client.health_check()?)?,

        Commands::Collections { action } => match action {
            CollectionAction::List { limit, offset } => {
                for collection in client.list_collections(limit, offset)? {
                    println!(
                        "{} {} ({} memories)",
                        collection.id, collection.name, collection.memory_count
                    );
                }
            }
            CollectionAction::Create { name, description } => {
                let collection = client.create_collection(&name, description.as_deref(), None)?;
                print_json(&collection)?;
            }
            CollectionAction::Delete { id } => {
                client.delete_collection(&id)?;
                println!("Deleted collection {}", id);
            }
        },

        Commands::Store {
            collection,
            content,
            file,
            role,
            memory_id,
            authority,
        } => {
            let content = match (file, content) {
                (Some(path), caption) => {
                    // Expand ~ in path
                    let path = shellexpand::tilde(&path).to_string();
                    let part = load_file(&path).with_context(|| format!("Failed to load {}", path))?;
                    let mut parts = vec![part];
                    if let Some(caption) = caption {
                        parts.push(nebula::ContentPart::text(caption));
                    }
                    MemoryContent::Parts(parts)
                }
                (None, Some(text)) => MemoryContent::Text(text),
                (None, None) => bail!("Provide content or --file"),
            };

            let mut memory = Memory::new(collection, content);
            memory.role = role;
            memory.memory_id = memory_id;
            memory.authority = authority;

            let id = client.store_memory(&memory)?;
            println!("{}", id);
        }

        Commands::Get { id } => print_json(&client.get_memory(&id)?)?,

        Commands::List {
            collections,
            limit,
            offset,
        } => {
            let options = ListOptions {
                limit,
                offset,
                ..Default::default()
            };
            print_json(&client.list_memories(&split_list(&collections), &options)?)?;
        }

        Commands::Search {
            query,
            collections,
            limit,
        } => {
            let options = SearchOptions::in_collections(
                collections.as_deref().map(split_list).unwrap_or_default(),
            )
            .with_limit(limit);
            print_json(&client.search(&query, &options)?)?;
        }

        Commands::Delete { id } => {
            client.delete(&id)?;
            println!("Deleted memory {}", id);
        }
    }

    client.close();
    Ok(())
}
