use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ReadAt;
use anyhow::{Result, anyhow, bail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY: u32 = 10;

/// Random access to a region file served over HTTP(S).
///
/// Every read is one or more `Range` requests, so a caller that only asks for the
/// header and the sectors it needs never downloads the rest of the file.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    requests: AtomicU64,
}

impl HttpRangeReader {
    /// Connect with a default client.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::with_client(url, client).await
    }

    /// Connect with a caller-configured client (proxies, TLS roots, timeouts).
    pub async fn with_client(url: String, client: Client) -> Result<Self> {
        let size = head(&client, &url).await?;
        tracing::debug!(url = %url, size, "Remote region reachable");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            requests: AtomicU64::new(1),
        })
    }

    /// Body bytes received so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// HTTP requests sent so far, the initial `HEAD` included.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Fetch `[start, end]` (inclusive) with one ranged `GET`.
    ///
    /// Timeouts and connection failures are retried with a linear backoff. The server may
    /// answer with fewer bytes than asked for.
    async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let range = format!("bytes={}-{}", start, end);
        let mut attempt = 0;

        loop {
            self.requests.fetch_add(1, Ordering::Relaxed);
            let sent = self
                .client
                .get(&self.url)
                .header(reqwest::header::RANGE, &range)
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => {
                    let body = resp.bytes().await?;
                    if body.is_empty() {
                        bail!("Server returned an empty body for {}", range);
                    }
                    self.transferred_bytes
                        .fetch_add(body.len() as u64, Ordering::Relaxed);
                    return Ok(body);
                }
                Ok(resp) => bail!("Range request {} failed with status: {}", range, resp.status()),
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt >= MAX_RETRY {
                        bail!("Range request {} failed after {} attempts: {}", range, attempt, e);
                    }
                    tracing::warn!(attempt, max_retry = MAX_RETRY, error = %e, "Retrying range request");
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Learn the remote size and confirm the server honours byte ranges.
async fn head(client: &Client, url: &str) -> Result<u64> {
    let resp = client.head(url).send().await?;
    if !resp.status().is_success() {
        bail!("HEAD {} failed with status: {}", url, resp.status());
    }

    let headers = resp.headers();
    let ranged = headers
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("bytes"));
    if !ranged {
        bail!("Remote server does not support Range requests");
    }

    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("Remote server did not return Content-Length"))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (end - offset + 1) as usize;
        let mut received = 0;

        while received < wanted {
            let body = self.fetch_range(offset + received as u64, end).await?;
            let n = body.len().min(wanted - received);
            buf[received..received + n].copy_from_slice(&body[..n]);
            received += n;
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
