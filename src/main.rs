//! # AskDocs CLI (`askdocs`)
//!
//! The `askdocs` binary is the interface to the RAG engine. It provides
//! commands for index initialization, document indexing, one-shot
//! questions, an interactive chat session, and index maintenance.
//!
//! ## Usage
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs init` | Create the SQLite index database |
//! | `askdocs index <chunks.json>` | Embed and index pre-chunked documentation |
//! | `askdocs ask "<question>"` | Answer one question against the index |
//! | `askdocs chat` | Interactive question-answering session |
//! | `askdocs stats` | Show index statistics and sample documents |
//! | `askdocs clear` | Delete everything from the index |

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use askdocs::chain::RagChain;
use askdocs::config::{self, Config};
use askdocs::embedding::generator::EmbeddingGenerator;
use askdocs::generation::HttpGenerationService;
use askdocs::index_cmd;
use askdocs::models::QueryResult;
use askdocs::retriever::Retriever;
use askdocs::store::{SqliteVectorStore, VectorStore};

/// AskDocs — retrieval-augmented question answering over your own
/// documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askdocs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askdocs",
    about = "AskDocs — retrieval-augmented question answering over indexed documentation",
    version,
    long_about = "AskDocs indexes pre-chunked documentation into a SQLite-backed vector store \
    and answers questions with a chat completion model grounded in the retrieved context. \
    Embeddings are cached on disk; generation falls back across configured models."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Creates the SQLite database file and its schema. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Embed and index pre-chunked documentation.
    ///
    /// Reads a JSON array of chunks (text plus metadata, optionally with
    /// precomputed embeddings), embeds the ones missing vectors, and adds
    /// everything to the index with content-based deduplication.
    Index {
        /// Path to the chunks JSON file.
        input: PathBuf,

        /// Delete the existing index contents before adding.
        #[arg(long)]
        clear: bool,

        /// Show counts without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Answer one question against the index.
    Ask {
        /// The question to answer.
        question: String,

        /// Number of documents to retrieve (defaults to config).
        #[arg(long)]
        top_k: Option<usize>,

        /// Re-rank candidates with Maximum Marginal Relevance.
        #[arg(long)]
        mmr: bool,

        /// MMR relevance/diversity trade-off in [0, 1] (defaults to config).
        #[arg(long)]
        diversity: Option<f32>,

        /// Stream the answer fragments as they arrive.
        #[arg(long)]
        stream: bool,

        /// Override the sampling temperature for this question.
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Interactive question-answering session.
    ///
    /// Keeps conversation history across questions so follow-ups work.
    /// In-session commands: `:clear` resets history, `:temp <t>` changes
    /// the sampling temperature, `:quit` leaves.
    Chat {
        /// Re-rank candidates with Maximum Marginal Relevance.
        #[arg(long)]
        mmr: bool,
    },

    /// Show index statistics and a few sample documents.
    Stats,

    /// Delete everything from the index.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askdocs=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            SqliteVectorStore::open(&cfg.index.path).await?;
            println!("Index initialized at {}", cfg.index.path.display());
        }
        Commands::Index {
            input,
            clear,
            dry_run,
        } => {
            index_cmd::run_index(&cfg, &input, clear, dry_run).await?;
        }
        Commands::Ask {
            question,
            top_k,
            mmr,
            diversity,
            stream,
            temperature,
        } => {
            if let Some(d) = diversity {
                cfg.retrieval.mmr_diversity = d;
            }
            let mut chain = build_chain(&cfg).await?;
            if let Some(t) = temperature {
                chain.update_temperature(t);
            }
            let result = chain.invoke(&question, top_k, mmr, stream).await;
            print_result(&result);
        }
        Commands::Chat { mmr } => {
            run_chat(&cfg, mmr).await?;
        }
        Commands::Stats => {
            run_stats(&cfg).await?;
        }
        Commands::Clear => {
            let store = SqliteVectorStore::open(&cfg.index.path).await?;
            store.clear().await?;
            println!("Index cleared.");
        }
    }

    Ok(())
}

async fn build_chain(cfg: &Config) -> anyhow::Result<RagChain> {
    let store = Arc::new(SqliteVectorStore::open(&cfg.index.path).await?);
    let embeddings = Arc::new(EmbeddingGenerator::from_config(&cfg.embedding)?);
    let retriever = Retriever::new(store, embeddings, &cfg.retrieval);
    let service = Arc::new(HttpGenerationService::from_config(&cfg.generation)?);

    Ok(RagChain::new(
        retriever,
        service,
        &cfg.generation,
        cfg.retrieval.mmr_diversity,
    ))
}

/// One parsed line of chat input.
#[derive(Debug, PartialEq)]
enum ChatInput {
    Empty,
    Quit,
    ClearHistory,
    SetTemperature(f32),
    Unknown(String),
    Question(String),
}

/// Parse a chat line. Lines starting with `:` are session commands;
/// everything else is a question.
fn parse_chat_input(line: &str) -> ChatInput {
    let input = line.trim();
    if input.is_empty() {
        return ChatInput::Empty;
    }
    if !input.starts_with(':') {
        return ChatInput::Question(input.to_string());
    }

    let mut parts = input.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match command {
        ":quit" | ":exit" => ChatInput::Quit,
        ":clear" => ChatInput::ClearHistory,
        ":temp" => match arg.parse::<f32>() {
            Ok(t) if (0.0..=1.0).contains(&t) => ChatInput::SetTemperature(t),
            _ => ChatInput::Unknown(format!(
                "usage: :temp <value between 0.0 and 1.0> (got '{}')",
                arg
            )),
        },
        other => ChatInput::Unknown(format!(
            "unknown command '{}' (try :clear, :temp <t>, :quit)",
            other
        )),
    }
}

async fn run_chat(cfg: &Config, mmr: bool) -> anyhow::Result<()> {
    let mut chain = build_chain(cfg).await?;

    println!("AskDocs chat — type your question; `:clear` resets history, `:temp <t>` changes temperature, `:quit` leaves.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        match parse_chat_input(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::ClearHistory => {
                chain.clear_history();
                println!("History cleared.");
            }
            ChatInput::SetTemperature(t) => {
                chain.update_temperature(t);
                println!("Temperature set to {}.", t);
            }
            ChatInput::Unknown(message) => {
                println!("{}", message);
            }
            ChatInput::Question(question) => {
                let result = chain.invoke(&question, None, mmr, false).await;
                print_result(&result);
            }
        }
    }

    Ok(())
}

async fn run_stats(cfg: &Config) -> anyhow::Result<()> {
    let store = SqliteVectorStore::open(&cfg.index.path).await?;

    println!("index stats");
    println!("  path: {}", cfg.index.path.display());
    println!("  documents: {}", store.count().await);
    println!("  indexed: {}", store.is_indexed().await);

    let samples = store.sample(3).await?;
    if !samples.is_empty() {
        println!("  sample documents:");
        for doc in samples {
            let preview: String = doc.text.chars().take(60).collect();
            println!("    {} — {}", doc.id, preview);
        }
    }

    Ok(())
}

fn print_result(result: &QueryResult) {
    println!("{}", result.answer);

    if !result.sources.is_empty() {
        println!("\nSources:");
        for (i, source) in result.sources.iter().enumerate() {
            println!(
                "  {}. {} ({}) — score {:.2}",
                i + 1,
                source.title,
                source.source_url,
                source.score
            );
        }
    }

    println!("\n({} sources, {:.2}s)", result.num_sources, result.response_time);
}
