//! # kbchat CLI
//!
//! Knowledge-base grounded chat from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! kbchat --config ./config/kbchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbchat kb list` | List documents in the knowledge base |
//! | `kbchat kb add <name>` | Add a text document (from `--text` or stdin) |
//! | `kbchat kb import <path>` | Import a PDF, DOCX, TXT or MD file |
//! | `kbchat kb search "<query>"` | Search the knowledge base |
//! | `kbchat ask "<message>"` | Send one message and print the reply |
//! | `kbchat chat` | Start an interactive chat |
//! | `kbchat settings show` | Print settings with the API key masked |
//! | `kbchat settings set <key> <value>` | Update one setting |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::io::Read;
use std::path::{Path, PathBuf};

use kbchat::config::{self, Config};
use kbchat::models::ImageSource;
use kbchat::search::{search_with, SearchOptions};
use kbchat::session::Session;
use kbchat::settings::Settings;
use kbchat::store::DocumentStore;
use kbchat::{render, repl};

/// kbchat: chat with a model, grounded in a local knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbchat",
    about = "Terminal chat client grounded in a local knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kbchat.toml`. A missing file means built-in
    /// defaults.
    #[arg(long, global = true, default_value = "./config/kbchat.toml")]
    config: PathBuf,

    /// Enable debug logging on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the knowledge base.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Send a single message and print the reply.
    Ask {
        /// The message to send.
        message: String,

        /// Attach an image (repeatable).
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },

    /// Start an interactive chat session.
    Chat,

    /// Show or change persisted settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// List document names and sizes.
    List,

    /// Add a text document. `.txt` is appended when the name has no extension.
    Add {
        name: String,

        /// Document text. Read from stdin when omitted.
        #[arg(long)]
        text: Option<String>,
    },

    /// Import a PDF, DOCX, TXT or MD file.
    Import { path: PathBuf },

    /// Search documents and print ranked snippets.
    Search {
        query: String,

        /// Maximum number of results. Defaults to `retrieval.max_results`.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print settings as JSON (API key masked).
    Show,

    /// Set one key and save.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Kb { action } => match action {
            KbAction::List => kb_list(&cfg)?,
            KbAction::Add { name, text } => kb_add(&cfg, &name, text)?,
            KbAction::Import { path } => kb_import(&cfg, &path)?,
            KbAction::Search { query, limit } => kb_search(&cfg, &query, limit)?,
        },
        Commands::Ask { message, images } => ask(cfg, &message, &images).await?,
        Commands::Chat => {
            let mut session = Session::open(cfg)?;
            repl::run(&mut session).await?;
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show => {
                let settings = Settings::load(&cfg.settings.path);
                println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
                if std::env::var(config::API_KEY_ENV).is_ok_and(|k| !k.trim().is_empty()) {
                    println!("(api_key overridden by {})", config::API_KEY_ENV);
                }
            }
            SettingsAction::Set { key, value } => {
                let mut settings = Settings::load(&cfg.settings.path);
                settings.set(&key, &value)?;
                settings.save(&cfg.settings.path)?;
                println!("Updated {}", key);
            }
        },
    }

    Ok(())
}

fn open_store(cfg: &Config) -> Result<DocumentStore> {
    DocumentStore::load(&cfg.knowledge_base.dir, &cfg.knowledge_base.include_globs).with_context(
        || {
            format!(
                "Failed to load knowledge base: {}",
                cfg.knowledge_base.dir.display()
            )
        },
    )
}

fn kb_list(cfg: &Config) -> Result<()> {
    let store = open_store(cfg)?;
    if store.is_empty() {
        println!("No documents in {}", store.dir().display());
        return Ok(());
    }
    for doc in store.documents() {
        println!("{}  ({} chars)", style(&doc.name).bold(), doc.size());
    }
    println!("{} documents", store.len());
    Ok(())
}

fn kb_add(cfg: &Config, name: &str, text: Option<String>) -> Result<()> {
    let content = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read document text from stdin")?;
            buf
        }
    };

    let name = if Path::new(name).extension().is_none() {
        format!("{}.txt", name)
    } else {
        name.to_string()
    };

    let mut store = open_store(cfg)?;
    let doc = store.add(&name, &content)?;
    println!("Added {} ({} chars)", doc.name, doc.size());
    Ok(())
}

fn kb_import(cfg: &Config, path: &Path) -> Result<()> {
    let mut store = open_store(cfg)?;
    let doc = store
        .import(path)
        .with_context(|| format!("Failed to import {}", path.display()))?;
    println!("Imported {} ({} chars)", doc.name, doc.size());
    Ok(())
}

fn kb_search(cfg: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let store = open_store(cfg)?;
    let limit = limit.unwrap_or(cfg.retrieval.max_results);
    let results = search_with(&store, query, limit, &SearchOptions::from(&cfg.retrieval));

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. {} (relevance: {})",
            i + 1,
            style(&result.name).bold(),
            result.relevance
        );
        for snippet in &result.snippets {
            println!("    {}", snippet.replace('\n', " "));
        }
        println!();
    }
    Ok(())
}

async fn ask(cfg: Config, message: &str, image_paths: &[PathBuf]) -> Result<()> {
    let images = image_paths
        .iter()
        .map(|p| repl::load_image(p))
        .collect::<Result<Vec<ImageSource>>>()?;

    let mut session = Session::open(cfg)?;
    let reply = session.send(message, &images).await?;

    println!("{}", render::to_terminal(&reply));
    eprintln!("{}", style(session.usage_summary()).dim());
    Ok(())
}
