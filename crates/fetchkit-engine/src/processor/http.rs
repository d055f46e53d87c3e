//! HTTP processor.
//!
//! Streams `http`/`https` downloadables into uniquely-named `.part` files
//! under a spool directory, reporting lifecycle events through the observer
//! contract. Cancellation is checked between chunks via a biased select;
//! progress events are rate-limited so bursts of small chunks don't flood
//! the queue.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use fetchkit_core::ports::{Processor, ProcessorObserver};
use fetchkit_core::resource::{DownloadError, DownloadResult, Downloadable};
use fetchkit_core::utils::cache_file_name;

use crate::progress::ProgressGate;

/// Configuration for the HTTP processor.
#[derive(Clone, Debug)]
pub struct HttpProcessorConfig {
    /// Directory `.part` files are spooled into.
    pub spool_dir: PathBuf,
    /// Minimum interval between progress events per transfer.
    pub progress_interval: Duration,
    /// Byte advance that justifies a progress event before the interval.
    pub progress_byte_stride: u64,
    /// Optional per-request timeout; the engine itself imposes none.
    pub timeout: Option<Duration>,
}

impl Default for HttpProcessorConfig {
    fn default() -> Self {
        Self {
            spool_dir: std::env::temp_dir().join("fetchkit-spool"),
            progress_interval: Duration::from_millis(100),
            progress_byte_stride: 256 * 1024,
            timeout: None,
        }
    }
}

impl HttpProcessorConfig {
    /// Create a config spooling into the given directory.
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            ..Default::default()
        }
    }

    /// Set the minimum interval between progress events.
    #[must_use]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the byte stride that admits a progress event early.
    #[must_use]
    pub const fn with_progress_byte_stride(mut self, stride: u64) -> Self {
        self.progress_byte_stride = stride;
        self
    }

    /// Set a per-request timeout surfaced as a transport error.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Transport executor for `http`/`https` mirrors.
pub struct HttpProcessor {
    client: reqwest::Client,
    config: HttpProcessorConfig,
    paused: AtomicBool,
    pending: Mutex<Vec<Arc<Downloadable>>>,
    observer: Mutex<Option<Weak<dyn ProcessorObserver>>>,
    self_ref: Weak<Self>,
}

impl HttpProcessor {
    /// Create a processor.
    ///
    /// Must be called inside a tokio runtime; buffered work is replayed on
    /// spawned tasks.
    #[must_use]
    pub fn new(config: HttpProcessorConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            client: reqwest::Client::new(),
            config,
            paused: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
            self_ref: weak.clone(),
        })
    }

    fn observer(&self) -> Option<Arc<dyn ProcessorObserver>> {
        self.observer.lock().unwrap().as_ref()?.upgrade()
    }

    async fn run_transfer(&self, downloadable: Arc<Downloadable>) {
        let Some(observer) = self.observer() else {
            tracing::warn!(
                target: "fetchkit.engine",
                id = downloadable.identifier(),
                "Transfer dropped: no observer registered"
            );
            return;
        };

        if downloadable.is_cancelled() {
            if downloadable.try_terminate() {
                downloadable.mark_finished();
                observer
                    .download_failed(&downloadable, DownloadError::Cancelled)
                    .await;
            }
            return;
        }

        downloadable.start();
        observer.download_began(&downloadable).await;

        match self.execute(&downloadable, observer.as_ref()).await {
            Ok(temp_file) => {
                if downloadable.try_terminate() {
                    downloadable.mark_finished();
                    observer.download_finished(&downloadable, temp_file).await;
                } else {
                    // A racing terminal event won; the spooled bytes are moot
                    remove_quietly(&temp_file).await;
                }
            }
            Err(error) => {
                if downloadable.try_terminate() {
                    downloadable.mark_finished();
                    observer.download_failed(&downloadable, error).await;
                }
            }
        }
    }

    async fn execute(
        &self,
        downloadable: &Arc<Downloadable>,
        observer: &dyn ProcessorObserver,
    ) -> DownloadResult<PathBuf> {
        fs::create_dir_all(&self.config.spool_dir)
            .await
            .map_err(|e| DownloadError::from_io_error(&e))?;

        let mut request = self.client.get(downloadable.location());
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }

        let response = tokio::select! {
            biased;

            () = downloadable.cancelled() => return Err(DownloadError::Cancelled),

            result = request.send() => result.map_err(map_transport_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::transport_with_status(
                format!("unexpected status {status} from {}", downloadable.location()),
                status.as_u16(),
            ));
        }

        let total = response.content_length();
        if let Some(total) = total {
            downloadable.set_total_bytes(total);
        }

        let temp_file = self.config.spool_dir.join(format!(
            "{}-{}.part",
            cache_file_name(downloadable.identifier()),
            uuid::Uuid::new_v4()
        ));
        let mut file = fs::File::create(&temp_file)
            .await
            .map_err(|e| DownloadError::from_io_error(&e))?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut gate = ProgressGate::new(
            self.config.progress_interval,
            self.config.progress_byte_stride,
        );

        loop {
            let next = tokio::select! {
                biased;

                () = downloadable.cancelled() => {
                    drop(file);
                    remove_quietly(&temp_file).await;
                    return Err(DownloadError::Cancelled);
                }

                chunk = stream.next() => chunk,
            };

            let Some(chunk) = next else { break };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    remove_quietly(&temp_file).await;
                    return Err(map_transport_error(e));
                }
            };

            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                remove_quietly(&temp_file).await;
                return Err(DownloadError::from_io_error(&e));
            }

            written += chunk.len() as u64;
            downloadable.set_transferred_bytes(written);
            if gate.admit(written) {
                observer
                    .bytes_transferred(downloadable, written, total)
                    .await;
            }
        }

        if let Err(e) = file.flush().await {
            drop(file);
            remove_quietly(&temp_file).await;
            return Err(DownloadError::from_io_error(&e));
        }

        if downloadable.total_bytes() == 0 {
            downloadable.set_total_bytes(written);
        }
        // Final progress event bypasses the gate
        observer
            .bytes_transferred(downloadable, written, total.or(Some(written)))
            .await;

        Ok(temp_file)
    }
}

#[async_trait]
impl Processor for HttpProcessor {
    fn can_process(&self, downloadable: &Downloadable) -> bool {
        Url::parse(downloadable.location())
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    async fn process(&self, downloadable: Arc<Downloadable>) {
        if self.paused.load(Ordering::Acquire) {
            tracing::debug!(
                target: "fetchkit.engine",
                id = downloadable.identifier(),
                "Processor paused; buffering downloadable"
            );
            self.pending.lock().unwrap().push(downloadable);
            return;
        }
        self.run_transfer(downloadable).await;
    }

    async fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    async fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.enqueue_pending().await;
    }

    fn is_active(&self) -> bool {
        !self.paused.load(Ordering::Acquire)
    }

    async fn enqueue_pending(&self) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }
        let buffered: Vec<_> = std::mem::take(&mut *self.pending.lock().unwrap());
        for downloadable in buffered {
            if let Some(processor) = self.self_ref.upgrade() {
                tokio::spawn(async move {
                    processor.run_transfer(downloadable).await;
                });
            }
        }
    }

    fn set_observer(&self, observer: Weak<dyn ProcessorObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }
}

fn map_transport_error(error: reqwest::Error) -> DownloadError {
    let status = error.status().map(|s| s.as_u16());
    match status {
        Some(code) => DownloadError::transport_with_status(error.to_string(), code),
        None => DownloadError::transport(error.to_string()),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(
                target: "fetchkit.engine",
                path = %path.display(),
                error = %e,
                "Failed to remove spool file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchkit_core::resource::{DownloadPriority, FileMirror};

    fn downloadable(location: &str) -> Downloadable {
        Downloadable::new("res", FileMirror::new("m", location), DownloadPriority::Normal)
    }

    #[tokio::test]
    async fn claims_only_http_schemes() {
        let processor = HttpProcessor::new(HttpProcessorConfig::default());

        assert!(processor.can_process(&downloadable("http://example.com/a")));
        assert!(processor.can_process(&downloadable("https://example.com/a")));
        assert!(!processor.can_process(&downloadable("ftp://example.com/a")));
        assert!(!processor.can_process(&downloadable("not a url")));
    }

    #[tokio::test]
    async fn pause_buffers_incoming_work() {
        let processor = HttpProcessor::new(HttpProcessorConfig::default());
        processor.pause().await;
        assert!(!processor.is_active());

        let d = Arc::new(downloadable("https://example.com/a"));
        processor.process(Arc::clone(&d)).await;

        assert_eq!(processor.pending.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_downloadable_fails_without_network() {
        struct FailObserver {
            failed: Mutex<Vec<DownloadError>>,
        }

        #[async_trait]
        impl ProcessorObserver for FailObserver {
            async fn download_began(&self, _d: &Arc<Downloadable>) {}
            async fn bytes_transferred(&self, _d: &Arc<Downloadable>, _w: u64, _t: Option<u64>) {}
            async fn download_finished(&self, _d: &Arc<Downloadable>, _f: PathBuf) {}
            async fn download_failed(&self, _d: &Arc<Downloadable>, error: DownloadError) {
                self.failed.lock().unwrap().push(error);
            }
        }

        let processor = HttpProcessor::new(HttpProcessorConfig::default());
        let observer = Arc::new(FailObserver {
            failed: Mutex::new(Vec::new()),
        });
        let dyn_observer: Arc<dyn ProcessorObserver> = observer.clone();
        processor.set_observer(Arc::downgrade(&dyn_observer));

        let d = Arc::new(downloadable("https://example.invalid/a"));
        d.cancel();
        processor.process(Arc::clone(&d)).await;

        let failed = observer.failed.lock().unwrap();
        assert!(matches!(failed[0], DownloadError::Cancelled));
        assert!(d.is_terminal());
    }
}
