//! docqa: chat with your documents from the terminal.
//!
//! Documents are read from the paths given on the command line, indexed once
//! at startup, and queried through the retrieval ensemble. Set
//! `GOOGLE_API_KEY` (or put it in `.env`) to use Gemini, or pass `--offline`
//! to run on deterministic local providers.

mod offline;
mod repl;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use docqa_rag::gemini::{GeminiEmbeddingProvider, GeminiGenerativeProvider};
use docqa_rag::mock::{MockEmbeddingProvider, MockGenerativeProvider};
use docqa_rag::{ChunkingStrategy, Document, RagConfig, Session};
use tracing::info;

/// Ask questions about your own documents.
#[derive(Parser, Debug)]
#[command(name = "docqa", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields take their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Chunking strategy: fixed_size, recursive or semantic
    #[arg(long, global = true)]
    chunker: Option<String>,

    /// Use local deterministic providers instead of Gemini
    #[arg(long, global = true)]
    offline: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Index documents and start an interactive chat
    Chat {
        /// Documents to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Index documents and answer a single question
    Ask {
        /// Documents to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// The question to answer
        #[arg(short, long)]
        question: String,
    },
    /// Index documents and print the fused retrieval results for a query
    Search {
        /// Documents to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// The search query
        #[arg(short, long)]
        query: String,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    if cli.log_json {
        docqa_telemetry::init_json_telemetry("docqa", level);
    } else {
        docqa_telemetry::init_telemetry("docqa", level);
    }

    let config = load_config(cli.config.as_deref(), cli.chunker.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Chat { files } => {
            let session = start_session(config, cli.offline, &files).await?;
            repl::run(&session).await
        }
        Commands::Ask { files, question } => {
            let session = start_session(config, cli.offline, &files).await?;
            let answer = session.ask(&question).await?;
            println!("{}", answer.text);
            Ok(())
        }
        Commands::Search { files, query, json } => {
            let session = start_session(config, cli.offline, &files).await?;
            let results = session.retrieve(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!(
                        "[{}] {:.5}  {}#{}\n    {}",
                        i + 1,
                        result.fused_score,
                        result.chunk.source_id,
                        result.chunk.chunk_index,
                        result.chunk.text
                    );
                }
            }
            Ok(())
        }
    }
}

/// Read the configuration file, if any, and apply command-line overrides.
fn load_config(path: Option<&Path>, chunker: Option<&str>) -> anyhow::Result<RagConfig> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            RagConfig::from_json(&json)?
        }
        None => RagConfig::default(),
    };
    if let Some(name) = chunker {
        config.chunking = name.parse::<ChunkingStrategy>()?;
    }
    config.validate()?;
    Ok(config)
}

/// Read every file into page documents.
fn read_documents(files: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in files {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read document {}", path.display()))?;
        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        documents.extend(Document::from_source(&raw, &name));
    }
    Ok(documents)
}

async fn start_session(config: RagConfig, offline: bool, files: &[PathBuf]) -> anyhow::Result<Session> {
    let builder = Session::builder().config(config.clone());
    let builder = if offline {
        builder
            .embedding_provider(Arc::new(MockEmbeddingProvider::new(offline::EMBEDDING_DIMENSIONS)))
            .generative_provider(Arc::new(MockGenerativeProvider::new()))
            .synthesizer(Arc::new(offline::ExcerptSynthesizer::new(&config.context_separator)))
    } else {
        let embedder = GeminiEmbeddingProvider::from_env()?.with_model(&config.embedding_model);
        let generator = GeminiGenerativeProvider::from_env()?.with_model(&config.generation_model);
        builder.embedding_provider(Arc::new(embedder)).generative_provider(Arc::new(generator))
    };
    let session = builder.build()?;

    let documents = read_documents(files)?;
    let report = session.start(&documents).await?;
    info!(
        documents = report.documents,
        chunks = report.chunks,
        offline,
        "documents indexed"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_file_and_chunker_override_are_applied() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"top_k": 3, "chunk_size": 400, "chunk_overlap": 40}}"#).unwrap();

        let config = load_config(Some(file.path()), Some("recursive")).unwrap();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.chunking, ChunkingStrategy::Recursive);
        assert_eq!(config.mmr_fetch_k, 20);
    }

    #[test]
    fn unknown_chunker_is_rejected() {
        assert!(load_config(None, Some("bm25")).is_err());
    }

    #[test]
    fn documents_split_on_page_breaks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first page\u{000C}second page\u{000C}  ").unwrap();

        let documents = read_documents(&[file.path().to_path_buf()]).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1].text, "second page");
    }

    #[tokio::test]
    async fn offline_session_answers_from_excerpts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Rust has no garbage collector. Memory is freed when owners go out of scope.")
            .unwrap();

        let session =
            start_session(RagConfig::default(), true, &[file.path().to_path_buf()]).await.unwrap();
        let answer = session.ask("Does Rust have a garbage collector?").await.unwrap();
        assert!(answer.text.contains("[1] Rust has no garbage collector."));
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["docqa", "search", "a.txt", "--query", "q", "--offline"])
            .unwrap();
        assert!(cli.offline);
        assert!(matches!(cli.command, Commands::Search { .. }));
    }
}
