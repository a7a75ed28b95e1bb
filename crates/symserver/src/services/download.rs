//! Downloads Breakpad `.sym` files from the configured symbol sources.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::config::Config;

/// How a symbol download can fail.
///
/// The two variants are deliberately distinct: a [`NotFound`](DownloadError::NotFound)
/// means every source definitively answered that the file does not exist,
/// while [`Upstream`](DownloadError::Upstream) covers transient conditions
/// (connect failures, timeouts, 5xx) where the file might well exist.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("symbol file not found on any source")]
    NotFound,
    #[error("symbol source failure: {0}")]
    Upstream(String),
}

pub struct Downloader {
    client: reqwest::Client,
    sources: Vec<Url>,
    retries: usize,
}

impl Downloader {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.download_timeout)
            .build()?;

        Ok(Self {
            client,
            sources: config.sources.clone(),
            retries: config.download_retries,
        })
    }

    /// Fetches `{source}/{debug_filename}/{debug_id}/{sym_filename}` from the
    /// first source that has it.
    ///
    /// Sources answering 404 (or 403, which S3-backed buckets use for missing
    /// keys) are skipped; transient failures are retried per source before
    /// moving on. If no source has the file, the result distinguishes a
    /// definitive miss from upstream trouble.
    pub async fn get(
        &self,
        debug_filename: &str,
        debug_id: &str,
        sym_filename: &str,
    ) -> Result<Vec<u8>, DownloadError> {
        let path = format!("{}/{}/{}", debug_filename, debug_id, sym_filename);
        let mut upstream_error = None;

        for source in &self.sources {
            let url = match source.join(&path) {
                Ok(url) => url,
                Err(err) => {
                    upstream_error = Some(format!("invalid download url: {}", err));
                    continue;
                }
            };

            match self.fetch(&url).await {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!("download from {} failed: {}", url, err);
                    upstream_error = Some(err.to_string());
                }
            }
        }

        match upstream_error {
            Some(message) => Err(DownloadError::Upstream(message)),
            None => Err(DownloadError::NotFound),
        }
    }

    /// Fetches one URL with retries. `Ok(None)` is a definitive miss.
    async fn fetch(&self, url: &Url) -> Result<Option<Vec<u8>>, reqwest::Error> {
        let mut attempt = 0;
        loop {
            let error = match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
                        return Ok(None);
                    }
                    match response.error_for_status() {
                        Ok(response) => match response.bytes().await {
                            Ok(body) => return Ok(Some(body.to_vec())),
                            Err(err) => err,
                        },
                        Err(err) => err,
                    }
                }
                Err(err) => err,
            };

            if attempt >= self.retries {
                return Err(error);
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
        }
    }
}
