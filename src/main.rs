use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use siren_downloader_rs::filename::FileNameTemplate;
use siren_downloader_rs::filename::DEFAULT_TEMPLATE;
use siren_downloader_rs::Downloader;
use siren_downloader_rs::ErrorMode;
use tracing_subscriber::EnvFilter;

/// Download songs from Monster Siren.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Folder to save the downloaded songs
    #[arg(short, long, default_value = PathBuf::from("Songs").into_os_string())]
    folder: PathBuf,

    /// File name format; placeholders: {cid}, {song_name}, {suffix}, {original_file_name}
    #[arg(short, long, default_value = DEFAULT_TEMPLATE)]
    name_format: FileNameTemplate,

    /// Overwrite existing files (otherwise skip existing)
    #[arg(short = 's', long)]
    overwrite_existing: bool,

    /// Number of concurrent tasks
    #[arg(short, long, default_value = "2")]
    concurrent_tasks: NonZeroUsize,

    /// Keep downloading the remaining songs when one fails
    #[arg(short, long)]
    keep_going: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    fs::create_dir_all(&args.folder)
        .with_context(|| format!("failed to create {}", args.folder.display()))?;

    let error_mode = if args.keep_going {
        ErrorMode::Capture
    } else {
        ErrorMode::Propagate
    };

    let downloader = Downloader::builder()
        .dest(args.folder)
        .name_template(args.name_format)
        .skip_existing(!args.overwrite_existing)
        .concurrency(args.concurrent_tasks.get())
        .error_mode(error_mode)
        .build();
    let report = downloader.download_all().await?;

    if report.failed > 0 {
        bail!("{} song(s) failed to download", report.failed);
    }
    Ok(())
}
