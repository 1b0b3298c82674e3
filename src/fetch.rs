//! Network access for size probes and streamed downloads.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Deadline for a whole size probe, and for opening a download connection.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest a download may go without receiving a byte. Large assets may take
/// far longer than this in total.
pub const DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(180);

/// Bytes buffered between the response body and the output file.
pub const COPY_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// A resolved download location and the credentials its host expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub url: String,
    pub bearer_token: Option<String>,
}

impl Download {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Length advertised by the server, read from the response headers
    /// without consuming the body.
    async fn content_length(&self, download: &Download) -> Result<Option<u64>>;

    /// Streams the download into `dst`, creating parent directories as
    /// needed. Returns the size of the finished file.
    async fn fetch_to_file(&self, download: &Download, dst: &Path) -> Result<u64>;
}

pub struct HttpFetcher {
    probe: Client,
    download: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeouts(PROBE_TIMEOUT, DOWNLOAD_READ_TIMEOUT)
    }

    /// `probe` bounds a whole size probe. `read` bounds each wait for body
    /// bytes during a download, which has no overall deadline.
    pub fn with_timeouts(probe: Duration, read: Duration) -> Result<Self> {
        Ok(Self {
            probe: Client::builder().timeout(probe).build()?,
            download: Client::builder()
                .connect_timeout(probe)
                .read_timeout(read)
                .build()?,
        })
    }
}

fn authorized(client: &Client, download: &Download) -> RequestBuilder {
    let request = client.get(&download.url);
    match &download.bearer_token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

pub fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn content_length(&self, download: &Download) -> Result<Option<u64>> {
        // Some signed blob URLs refuse HEAD, so start a GET and drop it once
        // the headers are in
        let response = authorized(&self.probe, download)
            .send()
            .await?
            .error_for_status()?;
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        Ok(length)
    }

    async fn fetch_to_file(&self, download: &Download, dst: &Path) -> Result<u64> {
        let url = download.url.as_str();
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Unable to create {}", parent.display()))?;
        }

        // Resume from a partial file left by an earlier attempt
        let partial = partial_path(dst);
        let existing = match fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = authorized(&self.download, download);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={existing}-"));
        }
        let response = request.send().await?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            fs::remove_file(&partial).await?;
            return Err(anyhow!("Server rejected resume of {url} at byte {existing}"));
        }
        let response = response.error_for_status()?;

        let resume = existing > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        if resume {
            debug!(url, existing, "resuming download");
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resume)
            .truncate(!resume)
            .open(&partial)
            .await
            .with_context(|| format!("Unable to open {}", partial.display()))?;

        let mut writer = BufWriter::with_capacity(COPY_BUFFER_BYTES, file);
        let mut byte_count = if resume { existing } else { 0 };
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            byte_count += chunk.len() as u64;
        }
        writer.flush().await?;
        drop(writer);

        fs::rename(&partial, dst)
            .await
            .with_context(|| format!("Unable to move download into {}", dst.display()))?;
        Ok(byte_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    const SLOW_CHUNK_GAP: Duration = Duration::from_millis(300);

    /// Serves `BODY` for any path, honouring `Range: bytes=N-`. `/missing`
    /// answers 404, `/private` answers 401 without `Bearer secret` and `/slow`
    /// sends the body 10 bytes at a time with a pause before each chunk.
    async fn serve() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&request).to_lowercase();
                    let start = request
                        .lines()
                        .find_map(|l| l.trim().strip_prefix("range: bytes="))
                        .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());

                    if request.starts_with("get /slow") {
                        let head = format!(
                            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                            BODY.len()
                        );
                        let _ = socket.write_all(head.as_bytes()).await;
                        for chunk in BODY.chunks(10) {
                            tokio::time::sleep(SLOW_CHUNK_GAP).await;
                            if socket.write_all(chunk).await.is_err() {
                                return;
                            }
                        }
                        let _ = socket.shutdown().await;
                        return;
                    }

                    let unauthorized = request.starts_with("get /private")
                        && !request.contains("authorization: bearer secret");
                    let response = if request.starts_with("get /missing") {
                        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_vec()
                    } else if unauthorized {
                        b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_vec()
                    } else if let Some(start) = start {
                        let body = &BODY[start..];
                        let mut r = format!(
                            "HTTP/1.1 206 Partial Content\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        r.extend_from_slice(body);
                        r
                    } else {
                        let mut r = format!(
                            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                            BODY.len()
                        )
                        .into_bytes();
                        r.extend_from_slice(BODY);
                        r
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_content_length() {
        let base = serve().await;
        let fetcher = HttpFetcher::new().unwrap();
        let length = fetcher
            .content_length(&Download::new(format!("{base}/B04.tif")))
            .await
            .unwrap();
        assert_eq!(length, Some(BODY.len() as u64));
        assert!(fetcher
            .content_length(&Download::new(format!("{base}/missing")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_fetch_to_file() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("nested/item/B04.tif");

        let fetcher = HttpFetcher::new().unwrap();
        let written = fetcher
            .fetch_to_file(&Download::new(format!("{base}/B04.tif")), &dst)
            .await
            .unwrap();
        assert_eq!(written, BODY.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), BODY);
        assert!(!partial_path(&dst).exists());
    }

    #[tokio::test]
    async fn test_fetch_resumes_partial_file() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("B08.tif");
        std::fs::write(partial_path(&dst), &BODY[..10]).unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let written = fetcher
            .fetch_to_file(&Download::new(format!("{base}/B08.tif")), &dst)
            .await
            .unwrap();
        assert_eq!(written, BODY.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_no_file() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("gone.tif");

        let fetcher = HttpFetcher::new().unwrap();
        assert!(fetcher
            .fetch_to_file(&Download::new(format!("{base}/missing")), &dst)
            .await
            .is_err());
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn test_slow_download_outlasts_read_timeout() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("slow.tif");

        // The body takes about 1.2 s in total but no single gap reaches 1 s
        let fetcher = HttpFetcher::with_timeouts(PROBE_TIMEOUT, Duration::from_secs(1)).unwrap();
        let started = Instant::now();
        let written = fetcher
            .fetch_to_file(&Download::new(format!("{base}/slow")), &dst)
            .await
            .unwrap();
        assert!(started.elapsed() > Duration::from_secs(1));
        assert_eq!(written, BODY.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_stalled_download_times_out() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("stalled.tif");

        let fetcher =
            HttpFetcher::with_timeouts(PROBE_TIMEOUT, Duration::from_millis(100)).unwrap();
        assert!(fetcher
            .fetch_to_file(&Download::new(format!("{base}/slow")), &dst)
            .await
            .is_err());
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("private.tif");
        let fetcher = HttpFetcher::new().unwrap();

        let anonymous = Download::new(format!("{base}/private"));
        assert!(fetcher.fetch_to_file(&anonymous, &dst).await.is_err());
        assert!(fetcher.content_length(&anonymous).await.is_err());

        let signed_in = anonymous.with_bearer_token(Some("secret".to_string()));
        assert_eq!(
            fetcher.content_length(&signed_in).await.unwrap(),
            Some(BODY.len() as u64)
        );
        let written = fetcher.fetch_to_file(&signed_in, &dst).await.unwrap();
        assert_eq!(written, BODY.len() as u64);
    }
}
