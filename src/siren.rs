//! Client for the Monster Siren catalog API.

use std::path::Path;
use std::path::PathBuf;

use futures_util::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufWriter;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;
use url::Url;

use crate::error::Error;
use crate::error::Result;
use crate::filename::sanitize_filename;
use crate::filename::FileNameFields;
use crate::filename::FileNameTemplate;

pub const SIREN_BASE_URL: &str = "https://monster-siren.hypergryph.com";

/// Longest response body excerpt written to debug logs.
const LOG_BODY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRef {
    pub cid: String,
    pub name: String,
    pub album_cid: String,
    #[serde(default)]
    pub artists: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SongsPage {
    list: Vec<SongRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongDetail {
    pub cid: String,
    pub name: String,
    pub album_cid: String,
    pub source_url: String,
    pub lyric_url: Option<String>,
    pub mv_url: Option<String>,
    pub mv_cover_url: Option<String>,
    #[serde(default)]
    pub artists: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumRef {
    pub cid: String,
    pub name: String,
    pub cover_url: String,
    #[serde(default)]
    pub artistes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDetail {
    pub cid: String,
    pub name: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub belong: String,
    pub cover_url: String,
    pub cover_de_url: Option<String>,
    #[serde(default)]
    pub artistes: Vec<String>,
}

/// Result of [`SirenClient::fetch_and_save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    Skipped { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct SirenClient {
    client: Client,
    base_url: String,
}

impl SirenClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Remote {
                url: url.to_string(),
                status,
            });
        }
        let body = resp.bytes().await.map_err(|e| Error::network(url, e))?;
        debug!(
            url,
            body = %excerpt(&String::from_utf8_lossy(&body)),
            "GET returned"
        );

        let schema_error = |source| Error::Schema {
            url: url.to_string(),
            source,
        };

        // The code is checked before `data` is decoded, as failed calls carry
        // no usable payload.
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_slice(&body).map_err(schema_error)?;
        if envelope.code != 0 {
            return Err(Error::Api {
                url: url.to_string(),
                code: envelope.code,
                msg: envelope.msg,
            });
        }
        serde_json::from_value(envelope.data.unwrap_or_default()).map_err(schema_error)
    }

    pub async fn albums(&self) -> Result<Vec<AlbumRef>> {
        self.get_json(&format!("{}/api/albums", self.base_url)).await
    }

    pub async fn album_data(&self, album_cid: &str) -> Result<AlbumDetail> {
        self.get_json(&format!("{}/api/album/{}/data", self.base_url, album_cid))
            .await
    }

    /// Lists every song in the catalog. The endpoint answers with the whole
    /// listing at once.
    pub async fn list_songs(&self) -> Result<Vec<SongRef>> {
        let page: SongsPage = self
            .get_json(&format!("{}/api/songs", self.base_url))
            .await?;
        Ok(page.list)
    }

    pub async fn song_data(&self, song_cid: &str) -> Result<SongDetail> {
        self.get_json(&format!("{}/api/song/{}", self.base_url, song_cid))
            .await
    }

    /// Streams the body of `url` into `writer`, returning the number of bytes
    /// written. The writer is flushed but not closed.
    pub async fn download_file<W>(&self, url: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Remote {
                url: url.to_string(),
                status,
            });
        }

        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::network(url, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| Error::write(url, e))?;
            written += chunk.len() as u64;
        }
        writer.flush().await.map_err(|e| Error::write(url, e))?;
        Ok(written)
    }

    /// Fetches a song's metadata and saves its audio file under `folder`.
    ///
    /// When `skip_existing` is set and the destination already exists, no
    /// audio request is made. The audio is written to a temporary `.part` file
    /// next to the destination and renamed into place once complete.
    #[instrument(skip(self, folder, template), fields(folder = %folder.display()))]
    pub async fn fetch_and_save(
        &self,
        song_cid: &str,
        folder: &Path,
        template: &FileNameTemplate,
        skip_existing: bool,
    ) -> Result<SaveOutcome> {
        let song = self.song_data(song_cid).await?;
        if song.mv_url.is_some() {
            return Err(Error::UnsupportedInput {
                cid: song.cid,
                what: "mvUrl",
            });
        }
        if song.mv_cover_url.is_some() {
            return Err(Error::UnsupportedInput {
                cid: song.cid,
                what: "mvCoverUrl",
            });
        }

        let file_name = file_name_for(&song, template)?;
        let path = folder.join(&file_name);

        if skip_existing
            && tokio::fs::try_exists(&path)
                .await
                .map_err(|e| Error::io(&path, e))?
        {
            info!(path = %path.display(), "File already exists, SKIPPING.");
            return Ok(SaveOutcome::Skipped { path });
        }

        // The partial file is removed when `part` is dropped, including when
        // this future is cancelled mid-transfer.
        let (file, part) = tempfile::Builder::new()
            .prefix(&format!("{file_name}."))
            .suffix(".part")
            .tempfile_in(folder)
            .map_err(|e| Error::io(folder, e))?
            .into_parts();
        let mut writer = BufWriter::new(File::from_std(file));
        let bytes = match self.download_file(&song.source_url, &mut writer).await {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(writer);
                let part_path = part.to_path_buf();
                if let Err(close_err) = part.close() {
                    warn!(
                        path = %part_path.display(),
                        error = %close_err,
                        "Failed to remove partial file"
                    );
                }
                return Err(e);
            }
        };
        drop(writer);
        part.persist(&path).map_err(|e| Error::io(&path, e.error))?;

        info!(
            name = song.name,
            cid = song.cid,
            path = %path.display(),
            bytes,
            "Downloaded successfully"
        );
        Ok(SaveOutcome::Downloaded { path, bytes })
    }
}

/// Renders and sanitizes the file name for `song`.
fn file_name_for(song: &SongDetail, template: &FileNameTemplate) -> Result<String> {
    let url = Url::parse(&song.source_url).map_err(|source| Error::InvalidUrl {
        url: song.source_url.clone(),
        source,
    })?;
    let original_file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let suffix = Path::new(original_file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let name = template.render(&FileNameFields {
        cid: &song.cid,
        song_name: &song.name,
        suffix: &suffix,
        original_file_name,
    });
    Ok(sanitize_filename(&name))
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(LOG_BODY_LIMIT) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
