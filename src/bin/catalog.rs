//! Command line tool for maintaining the textbook catalog.
//!
//! Copies PDF files into the textbook directory and keeps the database rows
//! in sync, so administrators never have to edit either by hand.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use ruuchebnik::catalog::{Grade, Subject};
use ruuchebnik::config::{DatabaseConfig, LogFormat, DEFAULT_TEXTBOOKS_DIR};
use ruuchebnik::db::{connect, init_database_schema, PgStore, Store};
use ruuchebnik::logging::init_tracing;
use ruuchebnik::storage::{ImportRequest, TextbookStorage};

/// Textbook catalog maintenance.
#[derive(Parser, Debug)]
#[command(name = "catalog")]
#[command(about = "Manages the textbook catalog of the RUУчебник bot")]
#[command(version)]
struct Args {
    /// Directory holding textbook files.
    #[arg(long, env = "TEXTBOOKS_DIR", default_value = DEFAULT_TEXTBOOKS_DIR)]
    textbooks_dir: PathBuf,

    #[command(subcommand)]
    command: CatalogCommand,
}

#[derive(Subcommand, Debug)]
enum CatalogCommand {
    /// Import a PDF file and register it as a textbook.
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        /// School grade, 1 to 11.
        #[arg(long)]
        grade: Grade,
        /// Subject code, e.g. mathematics or social_studies.
        #[arg(long)]
        subject: Subject,
        /// File to import.
        file: PathBuf,
    },
    /// Delete a textbook row and its file.
    Remove { id: i64 },
    /// Print every textbook in the catalog.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing(LogFormat::Text);

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Catalog command failed");
            eprintln!("✗ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let database = DatabaseConfig::from_env()?;
    let pool = connect(&database).await?;
    init_database_schema(&pool).await?;

    let store = PgStore::new(pool);
    let storage = TextbookStorage::new(args.textbooks_dir);

    match args.command {
        CatalogCommand::Add {
            title,
            author,
            grade,
            subject,
            file,
        } => {
            let textbook = storage
                .import(
                    &store,
                    &file,
                    ImportRequest {
                        title,
                        author,
                        grade,
                        subject,
                    },
                )
                .await?;
            println!(
                "✓ Added textbook #{}: {} ({}, grade {})",
                textbook.id,
                textbook.title,
                textbook.subject,
                textbook.grade.number()
            );
        }
        CatalogCommand::Remove { id } => match storage.remove(&store, id).await? {
            Some(textbook) => println!("✓ Removed textbook #{}: {}", textbook.id, textbook.title),
            None => println!("No textbook with id {id}"),
        },
        CatalogCommand::List => {
            let textbooks = store.all_textbooks().await?;
            if textbooks.is_empty() {
                println!("The catalog is empty");
            }
            for textbook in textbooks {
                println!(
                    "{:>5}  {:>2}  {:<20}  {}  ({})  downloads: {}",
                    textbook.id,
                    textbook.grade.number(),
                    textbook.subject.code(),
                    textbook.title,
                    textbook.author,
                    textbook.downloads
                );
            }
        }
    }

    Ok(())
}
