//! pdfrag CLI entry point

use clap::{Parser, Subcommand};
use pdfrag::{
    commands::{
        cmd_archive_name, cmd_query, cmd_rebuild, cmd_reset, cmd_set_metadata, cmd_status,
        print_archive_name, print_metadata_update, print_query_results, print_rebuild_stats,
        print_reset, print_status, QueryOptions, Services,
    },
    catalog::MetadataEdit,
    config::Config,
    error::Result,
};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdfrag")]
#[command(version, about = "Vector index maintenance for a PDF retrieval service", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Index(IndexCommand),

    /// Print the structured archive filename for the given metadata
    ArchiveName {
        /// First author
        #[arg(long)]
        author: Option<String>,

        /// Publication year
        #[arg(long)]
        year: Option<i64>,

        /// Document title
        #[arg(long)]
        title: Option<String>,

        /// Filename used when no metadata is given
        #[arg(long, default_value = "document.pdf")]
        fallback: String,
    },
}

/// Commands that open the catalog and the vector index
#[derive(Subcommand)]
enum IndexCommand {
    /// Show catalog and vector index status
    Status,

    /// Search the vector index
    Query {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Results to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Only documents of this type (paper, handbook, manual, report, other)
        #[arg(long)]
        document_type: Option<String>,

        /// Only documents published in this year
        #[arg(long)]
        year: Option<i64>,

        /// Only chunks of this document
        #[arg(long)]
        pdf_id: Option<i64>,
    },

    /// Repopulate an empty vector index from the catalog
    Rebuild,

    /// Drop the vector index and rebuild it from the catalog
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Edit a document's bibliographic metadata
    SetMetadata {
        /// Document ID
        id: i64,

        /// Publication year
        #[arg(long)]
        year: Option<i64>,

        /// Author (repeat for several, first author first)
        #[arg(long = "author")]
        authors: Vec<String>,

        /// Document type (paper, handbook, manual, report, other)
        #[arg(long)]
        document_type: Option<String>,

        /// Document title
        #[arg(long)]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    match cli.command {
        // No config, catalog or index needed
        Commands::ArchiveName {
            author,
            year,
            title,
            fallback,
        } => {
            let name = cmd_archive_name(author.as_deref(), year, title.as_deref(), &fallback);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&name)?);
            } else {
                print_archive_name(&name);
            }
            Ok(())
        }
        Commands::Index(command) => run_indexed(command, cli.config.as_deref(), cli.json).await,
    }
}

async fn run_indexed(command: IndexCommand, config_path: Option<&Path>, json: bool) -> Result<()> {
    // Load configuration
    let config = load_config(config_path)?;

    let auto_rebuild = match &command {
        IndexCommand::Rebuild => false,
        IndexCommand::Reset { .. } => true,
        _ => config.index.rebuild_on_start,
    };
    let services = Services::open(&config, auto_rebuild).await?;
    let backend = services.backend.as_ref();

    // Handle commands
    match command {
        IndexCommand::Status => {
            let status = cmd_status(&config, &services.catalog, backend).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        IndexCommand::Query {
            query,
            limit,
            offset,
            document_type,
            year,
            pdf_id,
        } => {
            let options = QueryOptions {
                limit,
                offset,
                document_type,
                publication_year: year,
                pdf_id,
            };

            let results = cmd_query(&config, &services.embedder, backend, &query, options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_query_results(&results);
            }
        }

        IndexCommand::Rebuild => {
            let stats = cmd_rebuild(&services.reconciler, backend).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_rebuild_stats(&stats);
            }
        }

        IndexCommand::Reset { yes } => {
            if !yes {
                eprintln!("⚠️  This will delete ALL indexed data!");
                eprintln!("Run with --yes to confirm.");
                std::process::exit(1);
            }

            let outcome = cmd_reset(backend).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_reset(&outcome);
            }
        }

        IndexCommand::SetMetadata {
            id,
            year,
            authors,
            document_type,
            title,
        } => {
            let edit = MetadataEdit {
                publication_year: year,
                authors: (!authors.is_empty()).then_some(authors),
                document_type,
                title,
            };

            let update = cmd_set_metadata(&config, &services.catalog, backend, id, edit).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&update)?);
            } else {
                print_metadata_update(&update);
            }
        }
    }

    // A rebuild triggered on open must not be cut short by process exit.
    backend.wait_for_rebuild().await;

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if path.extension().map_or(false, |e| e == "toml") => Config::load(path),
        Some(dir) => Config::load_from(Some(dir.to_path_buf())),
        None => Config::load_from(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_archive_name_and_index_commands_parse() {
        let cli = Cli::try_parse_from(["pdfrag", "archive-name", "--author", "Smith, John"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ArchiveName { author: Some(_), .. }
        ));

        let cli = Cli::try_parse_from(["pdfrag", "query", "deep learning", "--offset", "10"]).unwrap();
        match cli.command {
            Commands::Index(IndexCommand::Query { query, offset, .. }) => {
                assert_eq!(query, "deep learning");
                assert_eq!(offset, 10);
            }
            _ => panic!("expected an index query"),
        }

        let cli = Cli::try_parse_from(["pdfrag", "reset", "--yes"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Index(IndexCommand::Reset { yes: true })
        ));
    }
}
