//! Download Manager
//!
//! Materializes package payloads under `<destination>/<ID>/<file name>`.
//!
//! # Behavior
//!
//! - **Idempotent**: a target that already hashes to the declared checksum is
//!   skipped without any network call (unless `force` is set).
//! - **Concurrent**: all remaining transfers run at once; the manager imposes
//!   no ceiling of its own.
//! - **Isolated failures**: one faulted transfer never cancels its siblings.
//!   Every failed URL is reported with its reason and every successful
//!   payload stays on disk.
//! - **Integrity-checked**: transfers stream into `<file>.part`, are verified
//!   against the declared size and checksum, then renamed into place.
//!
//! No timeout or retry is layered on top of the HTTP client's own.

use crate::error::{DeployError, Result};
use crate::hash;
use crate::package::Package;
use futures_util::future::join_all;
use reqwest::{Client, Proxy};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Suffix of in-flight transfers; never a payload
pub const PARTIAL_SUFFIX: &str = ".part";

/// Default interval between progress observer calls
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One payload to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    pub id: String,
    pub url: String,
    pub file_name: String,
    /// Expected size in bytes, 0 when unknown
    pub file_size: u64,
    /// Expected SHA-256 (hex), empty when unknown
    pub checksum: String,
}

impl DownloadItem {
    pub fn from_package(package: &Package) -> Result<Self> {
        Ok(Self {
            id: package.id.clone(),
            url: package.payload_url()?.to_string(),
            file_name: package.extract.file_name.clone(),
            file_size: package.extract.file_size,
            checksum: package.extract.file_checksum.clone(),
        })
    }
}

/// A transfer that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    pub url: String,
    pub reason: String,
}

/// Aggregate outcome of one `fetch_all` call
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Payloads transferred by this call
    pub succeeded: Vec<PathBuf>,
    /// Payloads already present and valid
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<DownloadFailure>,
}

impl DownloadReport {
    /// True when no transfer faulted
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Convert a partial failure into an error listing every failed URL
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            return Ok(self);
        }
        if let [only] = self.failed.as_slice() {
            return Err(DeployError::download(&only.url, &only.reason));
        }
        let reasons: Vec<String> = self
            .failed
            .iter()
            .map(|f| format!("{} ({})", f.url, f.reason))
            .collect();
        Err(DeployError::download(
            format!("{} URLs", self.failed.len()),
            reasons.join("; "),
        ))
    }
}

/// Snapshot handed to the progress observer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Transfers started by this call
    pub total: usize,
    /// Transfers that reached a terminal state
    pub finished: usize,
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct ProgressCounters {
    total: usize,
    finished: AtomicUsize,
    bytes: AtomicU64,
}

impl ProgressCounters {
    fn snapshot(&self) -> DownloadProgress {
        DownloadProgress {
            total: self.total,
            finished: self.finished.load(Ordering::Relaxed),
            bytes_received: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Observer polled while transfers are in flight
pub type ProgressObserver<'a> = &'a (dyn Fn(DownloadProgress) + Sync);

/// Capability to make one package's payload present on disk
pub trait PayloadFetcher {
    fn fetch(&self, package: &Package) -> Result<()>;
}

/// Concurrent HTTP payload downloader
#[derive(Debug, Clone)]
pub struct DownloadManager {
    destination: PathBuf,
    proxy: Option<Proxy>,
    poll_interval: Duration,
}

impl DownloadManager {
    /// Create a manager writing under `destination`, optionally through a proxy
    pub fn new(destination: impl Into<PathBuf>, proxy: Option<&str>) -> Result<Self> {
        let proxy = proxy
            .map(|url| Proxy::all(url).map_err(|e| DeployError::InvalidUrl(e.to_string())))
            .transpose()?;
        Ok(Self {
            destination: destination.into(),
            proxy,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `<destination>/<ID>/<file name>`
    pub fn target_path(&self, item: &DownloadItem) -> PathBuf {
        self.destination.join(&item.id).join(&item.file_name)
    }

    /// Fetch every item, waiting until all transfers are terminal
    pub async fn fetch_all(&self, items: &[DownloadItem], force: bool) -> Result<DownloadReport> {
        self.fetch_all_observed(items, force, None).await
    }

    /// [`fetch_all`](Self::fetch_all) with a progress observer polled while waiting.
    ///
    /// The observer only sees snapshots; it cannot influence any transfer.
    pub async fn fetch_all_observed(
        &self,
        items: &[DownloadItem],
        force: bool,
        observer: Option<ProgressObserver<'_>>,
    ) -> Result<DownloadReport> {
        let mut report = DownloadReport::default();
        let mut pending = Vec::new();

        for item in items {
            let target = self.target_path(item);
            if !force && hash::file_matches(&target, &item.checksum) {
                debug!(
                    package = %item.id,
                    path = %target.display(),
                    "Payload already valid, skipping"
                );
                report.skipped.push(target);
            } else {
                pending.push(item);
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        let client = self.client()?;
        let counters = ProgressCounters {
            total: pending.len(),
            ..Default::default()
        };
        info!(count = pending.len(), "Starting payload transfers");

        let transfers = join_all(pending.iter().map(|item| {
            let client = &client;
            let counters = &counters;
            async move {
                let result = self.transfer(client, item, counters).await;
                counters.finished.fetch_add(1, Ordering::Relaxed);
                (*item, result)
            }
        }));
        tokio::pin!(transfers);

        let mut ticker = tokio::time::interval(self.poll_interval);
        let results = loop {
            tokio::select! {
                results = &mut transfers => break results,
                _ = ticker.tick() => {
                    if let Some(observe) = observer {
                        observe(counters.snapshot());
                    }
                }
            }
        };
        if let Some(observe) = observer {
            observe(counters.snapshot());
        }

        for (item, result) in results {
            match result {
                Ok(path) => {
                    info!(package = %item.id, path = %path.display(), "Payload downloaded");
                    report.succeeded.push(path);
                }
                Err(e) => {
                    warn!(
                        package = %item.id,
                        url = %item.url,
                        error = %e,
                        "Payload download failed"
                    );
                    report.failed.push(DownloadFailure {
                        url: item.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Blocking wrapper for callers outside an async runtime
    pub fn fetch_all_blocking(
        &self,
        items: &[DownloadItem],
        force: bool,
        observer: Option<ProgressObserver<'_>>,
    ) -> Result<DownloadReport> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.fetch_all_observed(items, force, observer))
    }

    fn client(&self) -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(proxy.clone());
        }
        Ok(builder.build()?)
    }

    async fn transfer(
        &self,
        client: &Client,
        item: &DownloadItem,
        counters: &ProgressCounters,
    ) -> Result<PathBuf> {
        let target = self.target_path(item);
        let dir = self.destination.join(&item.id);
        tokio::fs::create_dir_all(&dir).await?;

        let response = client.get(&item.url).send().await?.error_for_status()?;

        let partial = partial_path(&target);
        let streamed = async {
            let written = stream_to(response, &partial, counters).await?;
            verify(&partial, item, written).await
        }
        .await;
        if let Err(e) = streamed {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                debug!(path = %partial.display(), error = %cleanup, "No partial file to remove");
            }
            return Err(e);
        }

        tokio::fs::rename(&partial, &target).await?;
        Ok(target)
    }
}

/// `<file>.part` beside the target
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

async fn stream_to(
    mut response: reqwest::Response,
    partial: &Path,
    counters: &ProgressCounters,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        counters.bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }
    file.flush().await?;
    Ok(written)
}

async fn verify(partial: &Path, item: &DownloadItem, written: u64) -> Result<()> {
    if item.file_size > 0 && written != item.file_size {
        return Err(DeployError::download(
            &item.url,
            format!("size mismatch: expected {} bytes, got {}", item.file_size, written),
        ));
    }
    if item.checksum.trim().is_empty() {
        return Ok(());
    }
    let path = partial.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || hash::sha256_file(&path))
        .await
        .map_err(|e| DeployError::download(&item.url, e.to_string()))??;
    if hash::checksum_matches(&actual, &item.checksum) {
        Ok(())
    } else {
        Err(DeployError::download(
            &item.url,
            format!("checksum mismatch: expected {}, got {}", item.checksum, actual),
        ))
    }
}

impl PayloadFetcher for DownloadManager {
    fn fetch(&self, package: &Package) -> Result<()> {
        let item = DownloadItem::from_package(package)?;
        self.fetch_all_blocking(std::slice::from_ref(&item), false, None)?
            .into_result()
            .map(|_| ())
    }
}
