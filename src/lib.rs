use std::path::PathBuf;

use anyhow::anyhow;
use reqwest::Client;
use tracing::info;
use tracing::warn;

pub mod error;
pub mod filename;
pub mod limiter;
pub mod siren;

pub use error::Error;
use filename::FileNameTemplate;
pub use limiter::run_bounded;
use limiter::BoundedError;
pub use limiter::ErrorMode;
use siren::SaveOutcome;
pub use siren::SirenClient;
use siren::SIREN_BASE_URL;

/// Counts of what happened to each song of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Downloader {
    /// Destination directory to save songs.
    dest: PathBuf,

    name_template: FileNameTemplate,

    skip_existing: bool,

    /// Maximum number of songs fetched at the same time.
    concurrency: usize,

    error_mode: ErrorMode,

    client: SirenClient,
}

impl Downloader {
    pub fn builder() -> DownloaderBuilder {
        DownloaderBuilder::default()
    }

    /// Downloads every song in the catalog.
    ///
    /// With [`ErrorMode::Propagate`] the first failing song aborts the run
    /// and its error is returned. With [`ErrorMode::Capture`] every song is
    /// attempted and failures are only counted in the report.
    pub async fn download_all(&self) -> anyhow::Result<DownloadReport> {
        let songs = self.client.list_songs().await?;
        info!(count = songs.len(), concurrency = self.concurrency, "Listed songs");

        let tasks = songs.iter().map(|song| {
            self.client.fetch_and_save(
                &song.cid,
                &self.dest,
                &self.name_template,
                self.skip_existing,
            )
        });

        let outcomes = run_bounded(tasks, self.concurrency, self.error_mode)
            .await
            .map_err(|e| match e {
                BoundedError::Task { index, source } => anyhow!(source).context(format!(
                    "failed to download {} ({})",
                    songs[index].name, songs[index].cid
                )),
                other => anyhow!(other),
            })?;

        let mut report = DownloadReport::default();
        for (song, outcome) in songs.iter().zip(outcomes) {
            match outcome {
                Ok(SaveOutcome::Downloaded { .. }) => report.downloaded += 1,
                Ok(SaveOutcome::Skipped { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(name = song.name, cid = song.cid, error = %e, "Failed to download");
                    report.failed += 1;
                }
            }
        }

        info!(
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "Finished"
        );
        Ok(report)
    }
}

#[derive(Debug)]
pub struct DownloaderBuilder {
    dest: PathBuf,
    base_url: String,
    name_template: FileNameTemplate,
    skip_existing: bool,
    concurrency: usize,
    error_mode: ErrorMode,
    client: Option<Client>,
}

impl DownloaderBuilder {
    pub fn dest<P: Into<PathBuf>>(mut self, dest: P) -> Self {
        self.dest = dest.into();
        self
    }

    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn name_template(mut self, name_template: FileNameTemplate) -> Self {
        self.name_template = name_template;
        self
    }

    pub fn skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }

    /// Uses `client` for every request instead of a default one.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Downloader {
        Downloader {
            dest: self.dest,
            name_template: self.name_template,
            skip_existing: self.skip_existing,
            concurrency: self.concurrency,
            error_mode: self.error_mode,
            client: SirenClient::new(self.client.unwrap_or_default(), self.base_url),
        }
    }
}

impl Default for DownloaderBuilder {
    fn default() -> Self {
        Self {
            dest: PathBuf::from("Songs"),
            base_url: String::from(SIREN_BASE_URL),
            name_template: FileNameTemplate::default(),
            skip_existing: true,
            concurrency: 2,
            error_mode: ErrorMode::Propagate,
            client: None,
        }
    }
}
