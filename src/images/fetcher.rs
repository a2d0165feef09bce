//! Bounded streaming download of remote images.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Url};
use tempfile::SpooledTempFile;
use tracing::debug;

use super::error::FetchError;
use crate::config::CacheConfig;

/// A downloaded body, rewound and ready to be validated.
#[derive(Debug)]
pub struct FetchedImage {
    pub buffer: SpooledTempFile,
    pub len: u64,
    /// MIME essence of the response `Content-Type`, lowercased.
    pub content_type: Option<String>,
    /// Last non-empty path segment of the URL.
    pub suggested_name: Option<String>,
}

/// HTTP fetcher enforcing scheme, status, type and size limits.
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
    max_size: u64,
    allowed_types: Arc<Vec<String>>,
    spool_threshold: usize,
}

impl ImageFetcher {
    pub fn new(config: &CacheConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(FetchError::transport)?;

        Ok(Self {
            client,
            max_size: config.max_size_bytes,
            allowed_types: Arc::new(
                config
                    .allowed_types
                    .iter()
                    .map(|t| t.trim().to_ascii_lowercase())
                    .collect(),
            ),
            spool_threshold: config.spool_threshold_bytes,
        })
    }

    /// Download `url` into a spooled buffer.
    ///
    /// The declared headers are checked before any of the body is read, and
    /// the running byte count is checked before each chunk is written, so no
    /// more than the configured maximum is ever buffered.
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let parsed =
            Url::parse(url).map_err(|_| FetchError::UnsupportedScheme(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let suggested_name = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string);

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(FetchError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let content_type = match response.headers().get(CONTENT_TYPE) {
            Some(value) => {
                let raw = String::from_utf8_lossy(value.as_bytes());
                let essence = mime_essence(&raw);
                if !self.allowed_types.iter().any(|t| *t == essence) {
                    return Err(FetchError::RejectedType(essence));
                }
                Some(essence)
            }
            None => None,
        };

        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(declared) = declared_len {
            if declared > self.max_size {
                return Err(FetchError::TooLarge {
                    limit: self.max_size,
                });
            }
        }

        let mut buffer = SpooledTempFile::new(self.spool_threshold);
        let mut len: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(FetchError::transport)? {
            len += chunk.len() as u64;
            if len > self.max_size {
                return Err(FetchError::TooLarge {
                    limit: self.max_size,
                });
            }
            buffer.write_all(&chunk).map_err(FetchError::transport)?;
        }
        buffer
            .seek(SeekFrom::Start(0))
            .map_err(FetchError::transport)?;

        debug!(url = %url, bytes = len, content_type = ?content_type, "Fetched image");

        Ok(FetchedImage {
            buffer,
            len,
            content_type,
            suggested_name,
        })
    }
}

/// `image/PNG; charset=x` -> `image/png`
fn mime_essence(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
