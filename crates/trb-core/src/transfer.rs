//! Transfer pipeline: streams a resolved source into the scratch directory.
//!
//! - admission: oversize sources are rejected before any connection or file
//! - streaming: fixed 1 MiB chunks, each written to disk before the next read
//! - progress: throttled per job, plus one terminal update on completion
//! - cleanup: any failure removes the partial file before returning

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    time::Instant,
};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::{
    errors::TransferError,
    progress::{ProgressReporter, ProgressSample, ProgressThrottle},
    resolver::ResolvedSource,
    scratch::{ScratchDir, ScratchLease},
};

pub const CHUNK_SIZE: usize = 1024 * 1024;

type TransferResult<T> = std::result::Result<T, TransferError>;

/// An open byte stream from a remote endpoint.
pub struct ByteStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

/// Port for opening remote byte streams.
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    async fn open(&self, url: &str) -> TransferResult<ByteStream>;
}

/// reqwest-backed fetcher. The body is consumed incrementally through a
/// `StreamReader`; nothing is buffered beyond the current chunk.
///
/// `read_timeout` bounds the connect and the wait for response headers; the
/// pipeline applies the same deadline to every body read.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    http: reqwest::Client,
    read_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(read_timeout: Duration) -> TransferResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(read_timeout)
            .user_agent("trb/0.1")
            .build()
            .map_err(|e| TransferError::Network(format!("http client build failed: {e}")))?;
        Ok(Self { http, read_timeout })
    }
}

#[async_trait]
impl ByteFetcher for HttpFetcher {
    async fn open(&self, url: &str) -> TransferResult<ByteStream> {
        let resp = tokio::time::timeout(self.read_timeout, self.http.get(url).send())
            .await
            .map_err(|_| TransferError::Network("no response before timeout".to_string()))?
            .map_err(|e| TransferError::Network(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(TransferError::Network(format!(
                "unexpected status {}",
                resp.status()
            )));
        }

        let content_length = resp.content_length();
        let stream = resp
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        Ok(ByteStream {
            content_length,
            reader: Box::new(StreamReader::new(Box::pin(stream))),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Fetching,
    Completed,
    Failed,
    SkippedTooLarge,
}

/// One file moving through the pipeline.
#[derive(Debug)]
pub struct TransferJob {
    pub source: ResolvedSource,
    pub destination: Option<PathBuf>,
    /// Keeps `destination` away from sweeps until the job is dropped.
    pub lease: Option<ScratchLease>,
    pub state: JobState,
}

impl TransferJob {
    pub fn new(source: ResolvedSource) -> Self {
        Self {
            source,
            destination: None,
            lease: None,
            state: JobState::Pending,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn ByteFetcher>,
    scratch: Arc<ScratchDir>,
    read_timeout: Duration,
    progress_interval: Duration,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn ByteFetcher>,
        scratch: Arc<ScratchDir>,
        read_timeout: Duration,
        progress_interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            scratch,
            read_timeout,
            progress_interval,
        }
    }

    /// Download `job.source` into a unique scratch file and return its path.
    ///
    /// On success the job is `Completed` and `job.destination` names the file;
    /// on failure no file attributable to the job remains on disk.
    pub async fn transfer(
        &self,
        job: &mut TransferJob,
        size_ceiling: u64,
        reporter: &dyn ProgressReporter,
    ) -> TransferResult<PathBuf> {
        let name = job.source.display_name.clone();

        if job.source.byte_size > size_ceiling {
            job.state = JobState::SkippedTooLarge;
            info!(file = %name, size = job.source.byte_size, size_ceiling, "skipping oversize file");
            return Err(TransferError::TooLarge {
                size: job.source.byte_size,
                ceiling: size_ceiling,
            });
        }

        job.state = JobState::Fetching;
        let stream = match self.open_first_available(&job.source).await {
            Ok(s) => s,
            Err(e) => {
                job.state = JobState::Failed;
                return Err(e);
            }
        };

        let bytes_total = match job.source.byte_size {
            0 => stream.content_length.unwrap_or(0),
            n => n,
        };
        if bytes_total > size_ceiling {
            job.state = JobState::SkippedTooLarge;
            return Err(TransferError::TooLarge {
                size: bytes_total,
                ceiling: size_ceiling,
            });
        }

        let slot = self.scratch.allocate(&name);
        let started = Instant::now();
        let res = self
            .stream_to_file(
                stream.reader,
                &slot.partial,
                &name,
                bytes_total,
                size_ceiling,
                started,
                reporter,
            )
            .await;

        let sample = match res {
            Ok(sample) => sample,
            Err(e) => {
                remove_quietly(&slot.partial).await;
                job.state = match e {
                    TransferError::TooLarge { .. } => JobState::SkippedTooLarge,
                    _ => JobState::Failed,
                };
                warn!(file = %name, "transfer failed: {e}");
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&slot.partial, &slot.complete).await {
            remove_quietly(&slot.partial).await;
            job.state = JobState::Failed;
            return Err(TransferError::Write(e));
        }

        job.state = JobState::Completed;
        job.destination = Some(slot.complete.clone());
        job.lease = Some(slot.lease);
        info!(
            file = %name,
            bytes = sample.bytes_done,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transfer completed"
        );

        if let Err(e) = reporter.finished(&name, &sample).await {
            debug!("final progress update failed: {e}");
        }

        Ok(slot.complete)
    }

    async fn open_first_available(&self, source: &ResolvedSource) -> TransferResult<ByteStream> {
        let mut last_err = TransferError::Network("no endpoint".to_string());
        for (idx, url) in source.endpoints().enumerate() {
            match self.fetcher.open(url).await {
                Ok(s) => {
                    if idx > 0 {
                        info!(file = %source.display_name, fallback = idx, "using fallback endpoint");
                    }
                    return Ok(s);
                }
                Err(e) => {
                    warn!(file = %source.display_name, endpoint = idx, "endpoint failed: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_to_file(
        &self,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        partial: &Path,
        name: &str,
        bytes_total: u64,
        size_ceiling: u64,
        started: Instant,
        reporter: &dyn ProgressReporter,
    ) -> TransferResult<ProgressSample> {
        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(TransferError::Write)?;

        let mut throttle = ProgressThrottle::new(self.progress_interval, started);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes_done: u64 = 0;

        loop {
            let n = fill_chunk(reader.as_mut(), &mut buf, self.read_timeout).await?;
            if n == 0 {
                break;
            }

            bytes_done += n as u64;
            if bytes_done > size_ceiling {
                return Err(TransferError::TooLarge {
                    size: bytes_done,
                    ceiling: size_ceiling,
                });
            }

            file.write_all(&buf[..n])
                .await
                .map_err(TransferError::Write)?;

            let now = Instant::now();
            if throttle.should_emit_at(now) {
                let sample = ProgressSample {
                    bytes_done,
                    bytes_total,
                    timestamp: now,
                };
                if let Err(e) = reporter.report(name, &sample).await {
                    debug!("progress update failed: {e}");
                }
            }

            if n < buf.len() {
                break;
            }
        }

        file.flush().await.map_err(TransferError::Write)?;
        file.sync_all().await.map_err(TransferError::Write)?;

        Ok(ProgressSample {
            bytes_done,
            bytes_total,
            timestamp: Instant::now(),
        })
    }
}

/// Read until `buf` is full or the stream ends; returns the byte count.
/// A short count means end of stream.
async fn fill_chunk(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    buf: &mut [u8],
    read_timeout: Duration,
) -> TransferResult<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = tokio::time::timeout(read_timeout, reader.read(&mut buf[filled..]))
            .await
            .map_err(|_| TransferError::Network("read timed out".to_string()))?
            .map_err(|e| TransferError::Network(format!("read failed: {e}")))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove partial file: {e}"),
    }
}
