//! docuquery CLI - Command-line front end for the hybrid retrieval engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use dq_chunk::{build_chunks, WindowChunker};
use dq_core::{DocumentInput, EngineConfig, RetrievalResult};
use dq_embed::HashingEmbedder;
use dq_index::InMemoryVectorStore;
use dq_query::{LexicalReranker, RetrievalEngine};

const DEFAULT_COLLECTION: &str = "docuquery";

/// Page separator in plain-text inputs.
const FORM_FEED: char = '\x0c';

/// docuquery - Hybrid keyword and semantic search over local documents
#[derive(Parser)]
#[command(name = "docuquery")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/docuquery/config.toml, then ./docuquery.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index files in memory and search them
    Search {
        /// Search query
        query: String,

        /// Files or directories to search
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,

        /// Maximum number of results (default: retrieval.final_count)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Collection name
        #[arg(long, default_value = DEFAULT_COLLECTION)]
        collection: String,

        /// Dense weight between 0 (keyword only) and 1 (semantic only)
        #[arg(short, long)]
        weight: Option<f32>,

        /// Skip the reranking pass
        #[arg(long)]
        no_rerank: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a file is split into chunks
    Chunk {
        /// File to chunk
        path: PathBuf,

        /// Print chunks as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Search {
            query,
            files,
            recursive,
            top_k,
            collection,
            weight,
            no_rerank,
            json,
        } => {
            if let Some(weight) = weight {
                config.retrieval.hybrid_weight = weight;
            }
            let top_k = top_k.unwrap_or(config.retrieval.final_count);

            let mut paths = Vec::new();
            for path in &files {
                paths.extend(collect_files(path, recursive)?);
            }
            if paths.is_empty() {
                eprintln!("No text files found");
                std::process::exit(1);
            }

            let result = search(config, &paths, &query, top_k, &collection, !no_rerank).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Chunk { path, json } => {
            chunk(&config, &path, json)?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn search(
    config: EngineConfig,
    paths: &[PathBuf],
    query: &str,
    top_k: usize,
    collection: &str,
    rerank: bool,
) -> Result<RetrievalResult, Box<dyn std::error::Error>> {
    let mut engine = RetrievalEngine::new(
        config,
        Arc::new(HashingEmbedder::new()),
        Arc::new(InMemoryVectorStore::new()),
    )?;
    if rerank {
        engine = engine.with_reranker(Arc::new(LexicalReranker::new()));
    }

    for path in paths {
        let document = match read_document(path) {
            Ok(document) => document,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let report = engine.ingest_document(collection, document).await?;
        debug!("{}: {} chunks", path.display(), report.chunks);
    }

    Ok(engine.retrieve(query, top_k, collection).await)
}

fn chunk(config: &EngineConfig, path: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let document = read_document(path)?;
    let chunks = build_chunks(
        &WindowChunker::new(),
        &document,
        &config.chunking.to_chunk_config(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    for chunk in &chunks {
        let page = chunk
            .page_number
            .map(|p| format!(" page {}", p))
            .unwrap_or_default();
        println!(
            "#{} [{}..{}){} {} chars, {} tokens",
            chunk.id.seq,
            chunk.start_offset,
            chunk.end_offset,
            page,
            chunk.end_offset - chunk.start_offset,
            chunk.token_count
        );
    }
    println!("\n{} chunk(s)", chunks.len());
    Ok(())
}

fn print_result(result: &RetrievalResult) {
    if result.is_empty() {
        println!("No results for {:?}", result.query);
        return;
    }

    for source in &result.sources {
        let page = source
            .page_number
            .map(|p| format!(", page {}", p))
            .unwrap_or_default();
        println!(
            "[{}] {}{} (relevance {:.4})",
            source.rank, source.document_name, page, source.relevance_score
        );
        println!("    chars {}..{}", source.span.start, source.span.end);
        println!("    {}", source.snippet.replace('\n', " "));
        println!();
    }

    let mut notes = Vec::new();
    if result.used_reranking {
        notes.push("reranked");
    }
    if result.dense_unavailable {
        notes.push("keyword only");
    }
    let notes = if notes.is_empty() {
        String::new()
    } else {
        format!(" ({})", notes.join(", "))
    };
    println!(
        "{} result(s) in {}ms{}",
        result.len(),
        result.query_latency_ms,
        notes
    );
}

/// Read a text file as a document. Form feeds mark page starts.
fn read_document(path: &Path) -> Result<DocumentInput, std::io::Error> {
    let content = fs::read_to_string(path)?;
    let (text, page_breaks) = split_pages(&content);

    let mut document = DocumentInput::new(path.display().to_string(), text);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        document = document.with_name(name);
    }
    if let Some(page_breaks) = page_breaks {
        document = document.with_page_breaks(page_breaks);
    }
    Ok(document)
}

/// Strip form feeds and return the character offset at which each page
/// starts. Text without form feeds is unpaginated.
fn split_pages(content: &str) -> (String, Option<Vec<usize>>) {
    if !content.contains(FORM_FEED) {
        return (content.to_string(), None);
    }

    let mut text = String::with_capacity(content.len());
    let mut breaks = vec![0];
    let mut offset = 0;
    for c in content.chars() {
        if c == FORM_FEED {
            breaks.push(offset);
        } else {
            text.push(c);
            offset += 1;
        }
    }
    (text, Some(breaks))
}

fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();

    if path.is_file() {
        files.push(path.to_path_buf());
    } else if path.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        entries.sort();

        for entry_path in entries {
            if entry_path.is_file() && is_text_file(&entry_path) {
                files.push(entry_path);
            } else if entry_path.is_dir() && recursive {
                files.extend(collect_files(&entry_path, recursive)?);
            }
        }
    }

    Ok(files)
}

fn is_text_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(ext, "txt" | "md" | "markdown" | "text" | "rst")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pages_unpaginated() {
        let (text, breaks) = split_pages("no pages here");
        assert_eq!(text, "no pages here");
        assert!(breaks.is_none());
    }

    #[test]
    fn test_split_pages_form_feeds() {
        let (text, breaks) = split_pages("one\x0ctwo\x0cthree");
        assert_eq!(text, "onetwothree");
        assert_eq!(breaks, Some(vec![0, 3, 6]));
    }

    #[test]
    fn test_split_pages_counts_chars_not_bytes() {
        let (text, breaks) = split_pages("é\x0cü");
        assert_eq!(text, "éü");
        assert_eq!(breaks, Some(vec![0, 1]));
    }

    #[test]
    fn test_collect_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.md"), "a").unwrap();
        fs::write(dir.path().join("image.png"), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), "c").unwrap();

        let flat = collect_files(dir.path(), false).unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.txt"]);

        assert_eq!(collect_files(dir.path(), true).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_search_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handbook.txt");
        let content = concat!(
            "Vacation requests go to your manager.\n",
            "\x0cRefunds are issued within thirty days of purchase.\n",
        );
        fs::write(&path, content).unwrap();

        let result = search(
            EngineConfig::default(),
            &[path],
            "refunds",
            3,
            DEFAULT_COLLECTION,
            true,
        )
        .await
        .unwrap();

        assert!(result.used_reranking);
        assert_eq!(result.sources[0].document_name, "handbook.txt");
        assert_eq!(result.sources[0].page_number, Some(2));
    }
}
