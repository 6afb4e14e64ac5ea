//! Command-line client for stowage servers.

mod api_client;
mod uploader;

use anyhow::{Context, Result};
use api_client::ApiClient;
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{FileDescriptor, FileId, FileRecord};
use tokio::sync::mpsc;
use uploader::{UploadEvent, UploadOutcome, Uploader, UploaderOptions};

#[derive(Parser)]
#[command(name = "stowagectl")]
#[command(about = "Command-line client for stowage servers")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    api: ApiArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server base URL
    #[arg(long, env = "STOWAGE_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// User id sent for store permission checks
    #[arg(long, env = "STOWAGE_USER")]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file in resumable chunks
    Upload {
        /// Target store
        #[arg(long)]
        store: String,

        /// File to upload
        path: PathBuf,

        /// Stored name (default: the file name)
        #[arg(long)]
        name: Option<String>,

        /// MIME type (default: guessed from the extension)
        #[arg(long = "type")]
        content_type: Option<String>,

        /// Initial chunk size in bytes
        #[arg(long, default_value_t = stowage_core::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Largest chunk size in bytes (0 = unlimited)
        #[arg(long, default_value_t = stowage_core::MAX_CLIENT_CHUNK_SIZE)]
        max_chunk_size: usize,

        /// Keep the chunk size fixed
        #[arg(long)]
        no_adaptive: bool,

        /// Retries of a failing chunk before giving up
        #[arg(long, default_value_t = 5)]
        max_tries: u32,

        /// Leave a stopped upload on the server instead of deleting it
        #[arg(long)]
        keep_partial: bool,
    },
    /// Have the server fetch a file from a URL
    Import {
        /// Target store
        #[arg(long)]
        store: String,

        /// http(s) URL to fetch
        url: String,

        /// Stored name (default: derived from the URL)
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a file and its copies
    Delete {
        #[arg(long)]
        store: String,
        /// File id
        id: String,
        /// Upload token of the file
        #[arg(long, env = "STOWAGE_TOKEN")]
        token: String,
    },
    /// Show the record of a file
    Stat {
        #[arg(long)]
        store: String,
        /// File id
        id: String,
        /// Upload token of the file
        #[arg(long, env = "STOWAGE_TOKEN")]
        token: String,
    },
    /// Check server health and version
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let Cli { api, command } = Cli::parse();
    let client = ApiClient::new(&api.server)?.with_user(api.user.clone());

    match command {
        Commands::Upload {
            store,
            path,
            name,
            content_type,
            chunk_size,
            max_chunk_size,
            no_adaptive,
            max_tries,
            keep_partial,
        } => {
            let options = UploaderOptions {
                adaptive: !no_adaptive,
                chunk_size,
                max_chunk_size,
                max_tries,
                ..Default::default()
            };
            handle_upload(
                client,
                &store,
                &path,
                name,
                content_type,
                options,
                keep_partial,
            )
            .await
        }
        Commands::Import { store, url, name } => {
            let file = name.map(|name| FileDescriptor {
                content_type: stowage_core::extension_of(&name)
                    .and_then(|ext| stowage_core::mime::lookup(&ext)),
                name,
                ..Default::default()
            });
            let record = client
                .import(&store, &url, file.as_ref())
                .await
                .with_context(|| format!("failed to import {url}"))?;
            render_record(&record);
            Ok(())
        }
        Commands::Delete { store, id, token } => {
            let id = parse_id(&id)?;
            client
                .delete_file(&store, id, &token)
                .await
                .with_context(|| format!("failed to delete {id}"))?;
            println!("Deleted {id}");
            Ok(())
        }
        Commands::Stat { store, id, token } => {
            let id = parse_id(&id)?;
            let record = client
                .get_file(&store, id, &token)
                .await
                .with_context(|| format!("failed to fetch {id}"))?;
            render_record(&record);
            Ok(())
        }
        Commands::Health => {
            let health = client.health().await.context("health check failed")?;
            println!(
                "Server: {} (v{}, {} stores)",
                health.status, health.version, health.stores
            );
            Ok(())
        }
    }
}

fn parse_id(raw: &str) -> Result<FileId> {
    FileId::parse(raw).with_context(|| format!("invalid file id {raw:?}"))
}

async fn handle_upload(
    client: ApiClient,
    store: &str,
    path: &Path,
    name: Option<String>,
    content_type: Option<String>,
    options: UploaderOptions,
    keep_partial: bool,
) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("path has no file name")?,
    };
    let content_type = content_type.unwrap_or_else(|| stowage_core::mime::for_name(&name));
    let descriptor = FileDescriptor::new(name.clone(), 0).with_type(content_type);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut uploader = Uploader::new(
        Arc::new(client),
        store,
        descriptor,
        Bytes::from(data),
        options,
    )?
    .with_events(events_tx);

    let stop = uploader.stop_handle();
    let abort = uploader.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            if keep_partial {
                eprintln!("  Stopping after the current chunk...");
                stop.stop();
            } else {
                eprintln!("  Aborting after the current chunk...");
                abort.abort();
            }
        }
    });
    let progress = tokio::spawn(render_progress(events_rx));

    let outcome = uploader.start().await;
    let result = match outcome {
        Ok(UploadOutcome::Complete(record)) => {
            eprintln!(); // newline after progress
            render_record(&record);
            Ok(())
        }
        Ok(UploadOutcome::Stopped) => {
            eprintln!(); // newline after progress
            if let Some(remote) = uploader.remote() {
                println!("Upload stopped: file {} (token {})", remote.file_id, remote.token);
            }
            Ok(())
        }
        Ok(UploadOutcome::Aborted) => {
            eprintln!();
            println!("Upload aborted and removed from the server");
            Ok(())
        }
        Err(e) => {
            eprintln!();
            Err(anyhow::Error::new(e).context(format!("failed to upload {name}")))
        }
    };

    drop(uploader);
    let _ = progress.await;
    result
}

/// Print a single progress line per update until the session goes away.
async fn render_progress(mut events: mpsc::UnboundedReceiver<UploadEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Created(id) => tracing::debug!(file_id = %id, "Upload created"),
            UploadEvent::Progress(stats) => {
                eprint!(
                    "\r  {:>5.1}%  {} / {}  {}/s  ETA {}   ",
                    stats.progress * 100.0,
                    format_bytes(stats.loaded),
                    format_bytes(stats.total),
                    format_bytes(stats.average_speed as u64),
                    format_duration(stats.remaining_time),
                );
            }
            UploadEvent::Error(message) => {
                eprintln!();
                eprintln!("  Error: {message}");
            }
            UploadEvent::Started
            | UploadEvent::Stopped
            | UploadEvent::Completed(_)
            | UploadEvent::Aborted => {}
        }
    }
}

fn render_record(record: &FileRecord) {
    println!("ID:       {}", record.id);
    println!("Store:    {}", record.store);
    println!("Name:     {}", record.name);
    println!(
        "Type:     {}",
        record.content_type.as_deref().unwrap_or("unknown")
    );
    println!("Size:     {}", format_bytes(record.size));
    let state = if record.complete {
        "complete"
    } else if record.uploading {
        "uploading"
    } else {
        "paused"
    };
    println!("State:    {state} ({:.0}%)", record.progress * 100.0);
    if let Some(url) = &record.url {
        println!("URL:      {url}");
    }
    if let Some(original) = &record.original_id {
        println!(
            "Copy of:  {original} in {}",
            record.original_store.as_deref().unwrap_or("?")
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
