//! # TeamKB CLI (`kb`)
//!
//! ```bash
//! kb --config ./config/kb.toml init
//! kb add-document --project 1 ./handbook.pdf
//! kb add-email --project 1 --title "Release plan" --body-file mail.txt
//! kb process --project 1
//! kb ask --project 1 "When is the next release?"
//! kb audit --limit 20
//! ```
//!
//! `add-document` and `add-email` process the new item before returning
//! unless `--defer` is given; `process` drains a project's pending items
//! through the background worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use teamkb::app::App;
use teamkb::config::load_config;
use teamkb::extract::{MIME_DOCX, MIME_PDF, MIME_TEXT};
use teamkb::ingest_service::{DocumentUpload, EmailInput};
use teamkb::queue::{DeferredQueue, InlineQueue, JobQueue, WorkerQueue};
use teamkb_core::models::ItemStatus;
use teamkb_core::store::Store;

/// TeamKB: project knowledge ingestion and grounded answers.
#[derive(Parser)]
#[command(name = "kb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Upload a PDF, DOCX, or TXT file into a project.
    AddDocument {
        path: PathBuf,
        #[arg(long)]
        project: i64,
        #[arg(long)]
        user: Option<i64>,
        /// Leave the item pending instead of processing it now.
        #[arg(long)]
        defer: bool,
    },

    /// Add a pasted email into a project.
    AddEmail {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        user: Option<i64>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        sent_at: Option<String>,
        /// Email body text.
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        /// Read the email body from a file.
        #[arg(long)]
        body_file: Option<PathBuf>,
        #[arg(long)]
        defer: bool,
    },

    /// Process every pending item of a project.
    Process {
        #[arg(long)]
        project: i64,
    },

    /// List a project's knowledge items.
    Items {
        #[arg(long)]
        project: i64,
    },

    /// Ask a question against a project's knowledge base.
    Ask {
        question: String,
        #[arg(long)]
        project: i64,
        #[arg(long)]
        user: Option<i64>,
        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show recent AI audit entries.
    Audit {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("teamkb=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn mime_for_path(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => Ok(MIME_PDF),
        "docx" => Ok(MIME_DOCX),
        "txt" | "text" | "md" => Ok(MIME_TEXT),
        other => bail!("Only PDF, DOCX, and TXT files are allowed (got .{})", other),
    }
}

fn queue_for(app: &App, defer: bool) -> Arc<dyn JobQueue> {
    if defer {
        Arc::new(DeferredQueue)
    } else {
        Arc::new(InlineQueue::new(app.pipeline.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    let app = App::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized successfully.");
        }
        Commands::AddDocument {
            path,
            project,
            user,
            defer,
        } => {
            let mime = mime_for_path(&path)?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let item = app
                .ingest_service(queue_for(&app, defer))
                .create_from_document(
                    project,
                    user,
                    DocumentUpload {
                        filename,
                        mime: mime.to_string(),
                        bytes,
                    },
                )
                .await?;
            print_item_status(&app, item.id).await?;
        }
        Commands::AddEmail {
            project,
            user,
            title,
            from,
            sent_at,
            body,
            body_file,
            defer,
        } => {
            let body_text = match (body, body_file) {
                (Some(body), _) => body,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("Provide --body or --body-file"),
            };
            let item = app
                .ingest_service(queue_for(&app, defer))
                .create_from_email(
                    project,
                    user,
                    EmailInput {
                        title,
                        from,
                        sent_at,
                        body_text,
                    },
                )
                .await?;
            print_item_status(&app, item.id).await?;
        }
        Commands::Process { project } => {
            let pending: Vec<i64> = app
                .store
                .list_items(project)
                .await?
                .into_iter()
                .filter(|i| i.status == ItemStatus::Pending)
                .map(|i| i.id)
                .collect();
            println!("Processing {} pending item(s)...", pending.len());
            let queue = WorkerQueue::start(app.pipeline.clone(), app.config.ingest.workers);
            for id in &pending {
                queue.enqueue(*id).await?;
            }
            queue.shutdown().await;
            for id in pending {
                print_item_status(&app, id).await?;
            }
        }
        Commands::Items { project } => {
            let items = app.store.list_items(project).await?;
            if items.is_empty() {
                println!("No knowledge items.");
            }
            for item in items {
                println!(
                    "{:>5}  {:<9} {:<8} {}{}",
                    item.id,
                    item.status.as_str(),
                    item.kind.as_str(),
                    item.display_title(),
                    item.error_message.as_ref()
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Ask {
            question,
            project,
            user,
            json,
        } => {
            let outcome = app.answers.ask(project, user, &question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}\n", outcome.answer_text);
                for (i, c) in outcome.citations.iter().enumerate() {
                    println!(
                        "[{}] {} (chunk {})",
                        i + 1,
                        c.source_title.as_deref().unwrap_or("Document"),
                        c.chunk_id
                    );
                }
            }
        }
        Commands::Audit { limit } => {
            let entries = app.store.list_audit_entries().await?;
            let skip = entries.len().saturating_sub(limit);
            for e in entries.into_iter().skip(skip) {
                println!(
                    "{}  {:<7} {:<9} {:<24} {:>6}ms  tokens={}{}",
                    e.id,
                    e.status.as_str(),
                    e.provider,
                    e.model,
                    e.latency_ms.unwrap_or(0),
                    e.total_tokens
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    e.error_message
                        .map(|m| format!("  {}", m))
                        .unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

async fn print_item_status(app: &App, item_id: i64) -> Result<()> {
    let Some(item) = app.store.get_item(item_id).await? else {
        bail!("knowledge item {} not found", item_id);
    };
    let chunks = app.store.list_chunks(item_id).await?.len();
    match item.status {
        ItemStatus::Failed => println!(
            "Item {} \"{}\": failed: {}",
            item.id,
            item.title,
            item.error_message.unwrap_or_default()
        ),
        status => println!(
            "Item {} \"{}\": {} ({} chunks)",
            item.id,
            item.title,
            status.as_str(),
            chunks
        ),
    }
    Ok(())
}
