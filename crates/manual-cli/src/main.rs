//! Manual CLI - Command-line interface for the manual retrieval backend.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use manual_core::{BuildState, ManualConfig, SearchResult};
use manual_service::{HierarchicalOptions, ManualService, SearchOptions};

/// Manual - retrieval over a single ingested manual
#[derive(Parser)]
#[command(name = "manual")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/manual-rag/config.toml or ./manual-rag.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory holding chunks.jsonl and the built index
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SelectionArgs {
    /// Number of results
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// MMR relevance weight (1.0 = pure relevance, 0.0 = pure diversity)
    #[arg(short, long)]
    lambda: Option<f32>,

    /// Minimum MMR candidate pool
    #[arg(long)]
    candidates: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from the ingestion output
    Build {
        /// Rebuild even if an index exists
        #[arg(short, long)]
        force: bool,
    },

    /// Search chunks with MMR diversification
    Search {
        /// Search query
        query: String,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Section-scoped search, optionally enriched with a hypothetical answer
    Ask {
        /// Question
        query: String,

        /// Hypothetical answer averaged into the query embedding
        #[arg(long)]
        hyde: Option<String>,

        /// Skip the section filter
        #[arg(long)]
        no_hierarchical: bool,

        /// Number of sections the filter keeps
        #[arg(long)]
        section_top_k: Option<usize>,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Show index statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(
    path: Option<PathBuf>,
    storage: Option<PathBuf>,
) -> Result<ManualConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => {
            let mut config = ManualConfig::load(&path)?;
            config.apply_env(|k| std::env::var(k).ok())?;
            config
        }
        None => ManualConfig::load_default()?,
    };
    if let Some(dir) = storage {
        config.storage.dir = dir;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config, cli.storage)?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Build { force } => {
            let service = ManualService::from_config(config)?;
            build(&service, force).await;
        }
        Commands::Search { query, selection } => {
            let service = ManualService::from_config(config)?;
            let options = selection_options(&service, &selection);
            let results = service.search(&query, &options).await;
            print_results(results, selection.json);
        }
        Commands::Ask {
            query,
            hyde,
            no_hierarchical,
            section_top_k,
            selection,
        } => {
            let service = ManualService::from_config(config)?;
            let options = selection_options(&service, &selection);
            let mut hierarchy: HierarchicalOptions = service.hierarchical_options();
            if no_hierarchical {
                hierarchy.use_hierarchical = false;
            }
            if let Some(k) = section_top_k {
                hierarchy.section_top_k = k;
            }
            let results = service
                .search_hierarchical(&query, &options, hyde.as_deref(), &hierarchy)
                .await;
            print_results(results, selection.json);
        }
        Commands::Stats { json } => {
            let service = ManualService::from_config(config)?;
            stats(&service, json)?;
        }
    }

    Ok(())
}

fn selection_options(service: &ManualService, args: &SelectionArgs) -> SearchOptions {
    let mut options = service.search_options();
    if let Some(k) = args.top_k {
        options.top_k = k;
    }
    if let Some(lambda) = args.lambda {
        options.mmr_lambda = lambda;
    }
    if let Some(candidates) = args.candidates {
        options.mmr_candidates = candidates;
    }
    options
}

async fn build(service: &ManualService, force: bool) {
    let status = match service.start_build(force) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if status.state == BuildState::Indexing {
        println!("Building index...");
        service.wait_for_build().await;
    }

    match service.status() {
        Ok(status) if status.state == BuildState::Ready => {
            println!("{}", status.message);
            if let Ok(stats) = service.stats() {
                println!(
                    "- Chunks: {}\n- Sections: {}\n- Model: {} ({} dims)",
                    stats.chunks, stats.sections, stats.embedding_model, stats.dimension
                );
            }
            if !force && status.started_at.is_none() {
                println!("(use --force to rebuild)");
            }
        }
        Ok(status) => {
            eprintln!(
                "Error: {}",
                status.last_error.unwrap_or(status.message)
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_results(results: manual_core::Result<Vec<SearchResult>>, json: bool) {
    let results = match results {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.needs_rebuild() {
                eprintln!("Run 'manual build --force' to rebuild the index.");
            }
            std::process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&results) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if results.is_empty() {
        println!("No results.");
        return;
    }

    println!("Found {} results:\n", results.len());
    for (rank, result) in results.iter().enumerate() {
        let rerank = result
            .rerank_score
            .map(|s| format!(", rerank: {:.3}", s))
            .unwrap_or_default();
        println!(
            "---\n[{}] {} (pages {}-{}, score: {:.3}{})",
            rank + 1,
            result.section_title,
            result.page_start,
            result.page_end,
            result.score,
            rerank
        );
        println!("{}\n", result.text);
    }
}

fn stats(service: &ManualService, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stats = service.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Index statistics:\n");
    println!("- Storage: {}", stats.storage_dir);
    println!("- Index built: {}", if stats.has_index { "yes" } else { "no" });
    if let Some(id) = stats.build_id {
        println!("- Build: {}", id);
    }
    if let Some(pages) = stats.pages {
        println!("- Pages: {}", pages);
    }
    println!("- Chunks: {}", stats.chunks);
    println!("- Sections: {}", stats.sections);
    println!(
        "- Embedding model: {} ({} dims)",
        stats.embedding_model, stats.dimension
    );
    println!(
        "- Rerank: {}",
        if stats.rerank_enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}
