//! s3img - manage a folder-organized image library on S3-compatible storage
//!
//! Lists folders and images, uploads new images with previews, and resolves
//! public URLs and locally cached copies.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use s3img::cache::HttpFetcher;
use s3img::config::Settings;
use s3img::gallery::{
    parse_image_info, Folder, GalleryService, ImageInfo, UploadOutcome, UploadSource, WebpTranscoder,
};
use s3img::s3::AwsTransportFactory;

#[derive(Debug, Parser)]
#[command(name = "s3img", version, about = "Image library on S3-compatible storage")]
struct Cli {
    /// Settings file (default: <config dir>/s3img/config.toml)
    #[arg(long, short, global = true, env = "S3IMG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check endpoint reachability and credentials
    TestConnection,
    /// List folders
    Folders,
    /// List images in a folder
    Images { folder: String },
    /// Upload images into a folder
    Upload {
        folder: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the preview URL of an image
    PreviewUrl { folder: String, filename: String },
    /// Print the preview URL for an `{% image "URL" %}` embed
    EmbedPreview { text: String },
    /// Download an image into the local cache and print its path
    Fetch { folder: String, filename: String },
    /// Remove expired entries from the local cache
    Sweep,
}

fn parse_target(folder: &str, filename: &str) -> Result<(Folder, ImageInfo)> {
    let folder = Folder::parse(folder)?;
    let image =
        parse_image_info(filename).ok_or_else(|| anyhow!("Not an image filename: '{filename}'"))?;
    Ok((folder, image))
}

async fn read_sources(files: &[PathBuf]) -> Result<Vec<UploadSource>> {
    let mut sources = Vec::with_capacity(files.len());
    for path in files {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Not a file path: {}", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        sources.push(UploadSource {
            filename,
            bytes: Bytes::from(bytes),
        });
    }
    Ok(sources)
}

/// Cancel the token on Ctrl+C so long listings and sweeps stop early
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling");
            token.cancel();
        }
    });
    cancel
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    info!(
        bucket = %settings.bucket,
        endpoint = %settings.connection.display_endpoint(),
        "Settings loaded"
    );

    let service = GalleryService::new(
        &settings,
        Arc::new(AwsTransportFactory),
        Arc::new(HttpFetcher::new()?),
        Arc::new(WebpTranscoder),
    )?;
    service.initialize().await?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Command::TestConnection => {
            if let Err(e) = service.test_connection().await {
                return Err(anyhow!(e.user_message()));
            }
            println!("Connection OK ({})", settings.bucket);
        }
        Command::Folders => {
            for folder in service.list_folders(&cancel).await? {
                println!("{folder}");
            }
        }
        Command::Images { folder } => {
            let folder = Folder::parse(&folder)?;
            for image in service.list_images(&folder, &cancel).await? {
                println!("{}\t{}", image.filename, service.original_url(&folder, &image));
            }
        }
        Command::Upload { folder, files } => {
            let folder = Folder::parse(&folder)?;
            let sources = read_sources(&files).await?;
            let outcomes = service.upload_images(&folder, sources).await;

            let mut failed = 0;
            for outcome in &outcomes {
                match outcome {
                    UploadOutcome::Uploaded { filename, image } => {
                        println!("ok\t{filename}\t{}", service.original_url(&folder, image));
                    }
                    UploadOutcome::Failed { filename, message } => {
                        failed += 1;
                        println!("failed\t{filename}\t{message}");
                    }
                }
            }
            if failed > 0 {
                return Err(anyhow!("{failed} of {} uploads failed", outcomes.len()));
            }
        }
        Command::PreviewUrl { folder, filename } => {
            let (folder, image) = parse_target(&folder, &filename)?;
            println!("{}", service.preview_url(&folder, &image));
        }
        Command::EmbedPreview { text } => {
            let url = service
                .preview_url_for_embed(&text)
                .ok_or_else(|| anyhow!("No image embed found"))?;
            println!("{url}");
        }
        Command::Fetch { folder, filename } => {
            let (folder, image) = parse_target(&folder, &filename)?;
            let path = service.cached_image(&folder, &image).await?;
            println!("{}", path.display());
        }
        Command::Sweep => {
            let report = service.sweep_cache(&cancel).await?;
            for issue in &report.errors {
                warn!(path = %issue.path.display(), error = %issue.message, "Sweep issue");
            }
            println!(
                "Removed {} files and {} folders{}",
                report.files_removed,
                report.dirs_removed,
                if report.cancelled { " (cancelled)" } else { "" }
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
