//! 7tv CDN download client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use log::debug;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Upstream assets larger than this are rejected before transcoding.
const MAX_DOWNLOAD_SIZE: u64 = 10 << 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EXPECTED_CONTENT_TYPE: &str = "image/webp";

pub struct SevenTvApi {
    client: reqwest::Client,
    save_dir: PathBuf,
}

impl SevenTvApi {
    pub fn new(save_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build 7tv http client")?;
        Ok(Self {
            client,
            save_dir: save_dir.into(),
        })
    }

    /// Downloads the emote's 4x animated webp into the save dir, enforcing
    /// the size cap while streaming.
    pub async fn download_webp(&self, emote_id: &str) -> Result<PathBuf> {
        let url = format!("https://cdn.7tv.app/emote/{}/4x.webp", emote_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(anyhow!("response status code {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if content_type != EXPECTED_CONTENT_TYPE {
            return Err(anyhow!("invalid content type {:?}", content_type));
        }

        let out_path = self.save_dir.join(format!("{}.webp", Uuid::new_v4()));
        if let Err(err) = write_capped(response, &out_path).await {
            let _ = tokio::fs::remove_file(&out_path).await;
            return Err(err);
        }

        debug!("downloaded emote {} to {}", emote_id, out_path.display());
        Ok(out_path)
    }
}

async fn write_capped(response: reqwest::Response, out_path: &Path) -> Result<()> {
    let mut file = File::create(out_path)
        .await
        .with_context(|| format!("failed to create {}", out_path.display()))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("download stream failed")?;
        written += chunk.len() as u64;
        if written > MAX_DOWNLOAD_SIZE {
            return Err(anyhow!(
                "input file too large (>{}MB)",
                MAX_DOWNLOAD_SIZE >> 20
            ));
        }
        file.write_all(&chunk)
            .await
            .context("failed to write downloaded chunk")?;
    }

    file.flush().await.context("failed to flush download")?;
    Ok(())
}
