//! Networked JPEG/MJPEG capture sources

use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::debug;

use crate::camera::frame::Frame;
use crate::errors::AgentError;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

struct CachedFrame {
    frame: Frame,
    fetched_at: Instant,
}

/// HTTP camera returning either single JPEG snapshots or an MJPEG stream
pub struct NetworkSource {
    url: String,
    client: Client,
    timeout: Duration,
    coalesce_window: Duration,
    last: Mutex<Option<CachedFrame>>,
}

impl NetworkSource {
    pub fn new(url: &str, client: Client, timeout: Duration, coalesce_window: Duration) -> Self {
        Self {
            url: url.to_string(),
            client,
            timeout,
            coalesce_window,
            last: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time of the last successful fetch
    pub async fn last_frame_at(&self) -> Option<Instant> {
        self.last.lock().await.as_ref().map(|c| c.fetched_at)
    }

    /// Fetch a frame, sharing one request among callers inside the coalescing window.
    ///
    /// The cache lock is held across the request so concurrent callers wait
    /// for the in-flight fetch and then read its result.
    pub async fn fetch(&self) -> Result<Frame, AgentError> {
        let mut last = self.last.lock().await;
        if let Some(cached) = last.as_ref() {
            if cached.fetched_at.elapsed() < self.coalesce_window {
                debug!("Reusing frame from {} fetched {:?} ago", self.url, cached.fetched_at.elapsed());
                return Ok(cached.frame.clone());
            }
        }

        let frame = self.fetch_uncached().await?;
        *last = Some(CachedFrame {
            frame: frame.clone(),
            fetched_at: Instant::now(),
        });
        Ok(frame)
    }

    /// Drop the cached frame
    pub async fn clear(&self) {
        *self.last.lock().await = None;
    }

    async fn fetch_uncached(&self) -> Result<Frame, AgentError> {
        let camera_err = |e: reqwest::Error| AgentError::CameraError(format!("GET {} failed: {}", self.url, e));

        let mut response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(camera_err)?;

        if !response.status().is_success() {
            return Err(AgentError::CameraError(format!(
                "GET {} returned HTTP {}",
                self.url,
                response.status()
            )));
        }

        let is_multipart = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("multipart"))
            .unwrap_or(false);

        if !is_multipart {
            let body = response.bytes().await.map_err(camera_err)?;
            return Frame::from_jpeg(body.to_vec());
        }

        // MJPEG: read until the first complete JPEG is buffered
        let mut buffer = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(camera_err)? {
            buffer.extend_from_slice(&chunk);
            if let Some(jpeg) = extract_jpeg(&buffer) {
                return Frame::from_jpeg(jpeg.to_vec());
            }
            if buffer.len() > MAX_JPEG_BYTES {
                return Err(AgentError::CameraError(format!(
                    "no JPEG frame within {} bytes from {}",
                    MAX_JPEG_BYTES, self.url
                )));
            }
        }

        Err(AgentError::CameraError(format!("stream from {} ended before a frame", self.url)))
    }
}

/// Locate the first complete JPEG (SOI..EOI) in a buffer
pub fn extract_jpeg(buffer: &[u8]) -> Option<&[u8]> {
    let start = find(buffer, &JPEG_SOI)?;
    let end = find(&buffer[start + 2..], &JPEG_EOI)? + start + 2;
    Some(&buffer[start..end + 2])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
