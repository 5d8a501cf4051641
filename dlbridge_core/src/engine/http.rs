//! Single-connection HTTP engine.
//!
//! Each session is streamed to its destination file over one GET request.
//! A partially written file is resumed with a `Range` request when the
//! server answers `206 Partial Content`; otherwise the file is rewritten
//! from the start. Records live in a [`DownloadStore`] that is saved to
//! `state_path` (if configured) after every change.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::EngineError;
use crate::extras::{ExtraValue, Extras};
use crate::session::{Session, SessionRequest};
use crate::types::{DownloadFailure, FailureKind, HttpResponse, Reason, SessionId, Status};

use super::observers::ObserverRegistry;
use super::store::{DownloadRecord, DownloadStore};
use super::{DownloadEngine, DownloadObserver, ObserverHandle};

/// EMA smoothing factor. 0.3 = responsive but stable.
const EMA_ALPHA: f64 = 0.3;

const DEFAULT_NAMESPACE: &str = "dlbridge";

#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    pub namespace: String,
    /// JSON state file; records are kept in memory only when unset.
    pub state_path: Option<PathBuf>,
    pub connect_timeout: Duration,
    /// Minimum time between two progress notifications for one session.
    pub progress_interval: Duration,
    pub file_exist_checks: bool,
}

impl Default for HttpEngineConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            state_path: None,
            connect_timeout: Duration::from_secs(10),
            progress_interval: Duration::from_millis(500),
            file_exist_checks: true,
        }
    }
}

impl HttpEngineConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_file_exist_checks(mut self, enabled: bool) -> Self {
        self.file_exist_checks = enabled;
        self
    }
}

enum TransferEnd {
    Completed,
    Cancelled,
}

struct Inner {
    config: HttpEngineConfig,
    client: Client,
    store: Mutex<DownloadStore>,
    /// Held from snapshot to rename so saves land in the order they were taken.
    save_guard: tokio::sync::Mutex<()>,
    observers: ObserverRegistry,
    active: Mutex<Vec<SessionId>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

pub struct HttpEngine {
    inner: Arc<Inner>,
}

impl HttpEngine {
    /// Build the engine, loading records from `state_path` when it exists.
    pub async fn open(config: HttpEngineConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .build()?;

        let mut loaded = None;
        if let Some(path) = &config.state_path {
            if tokio::fs::try_exists(path).await? {
                let json = tokio::fs::read_to_string(path).await?;
                let store = DownloadStore::from_json(&json, config.file_exist_checks)?;
                log::info!("[engine] loaded state for {} from {:?}", store.namespace(), path);
                loaded = Some(store);
            }
        }
        let store = loaded.unwrap_or_else(|| {
            DownloadStore::new(config.namespace.clone()).with_file_exist_checks(config.file_exist_checks)
        });

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                store: Mutex::new(store),
                save_guard: tokio::sync::Mutex::new(()),
                observers: ObserverRegistry::new(),
                active: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        })
    }
}

impl Inner {
    fn store(&self) -> MutexGuard<'_, DownloadStore> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn active(&self) -> MutexGuard<'_, Vec<SessionId>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn notify(&self, record: &DownloadRecord, reason: Reason) {
        self.observers.notify(&record.to_notification(reason));
    }

    async fn persist(&self) {
        let Some(path) = &self.config.state_path else {
            return;
        };
        let _saving = self.save_guard.lock().await;
        let json = self.store().to_json();
        let result = match json {
            Ok(json) => write_atomic(path, &json).await.map_err(EngineError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::warn!("[engine] could not save state to {:?}: {}", path, e);
        }
    }

    fn spawn_transfer(self: &Arc<Self>, id: SessionId) {
        if self.cancel.is_cancelled() {
            log::debug!("[engine] closed, not starting {}", id);
            return;
        }
        {
            let mut active = self.active();
            if active.contains(&id) {
                log::debug!("[engine] transfer {} already running", id);
                return;
            }
            active.push(id);
        }

        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            let outcome = inner.transfer(id).await;
            inner.active().retain(|a| *a != id);
            match outcome {
                Ok(TransferEnd::Completed) => log::info!("[engine] download {} completed", id),
                Ok(TransferEnd::Cancelled) => log::debug!("[engine] download {} interrupted", id),
                Err(failure) => inner.fail(id, failure),
            }
            inner.persist().await;
        });
    }

    fn fail(&self, id: SessionId, failure: DownloadFailure) {
        let result = self.store().modify(id, |r| {
            r.status = Status::Failed;
            r.error = Some(failure);
            r.eta_ms = -1;
            r.bytes_per_second = -1;
        });
        match result {
            Ok(record) => self.notify(&record, Reason::DownloadError),
            Err(e) => log::debug!("[engine] could not record failure of {}: {}", id, e),
        }
    }

    fn record_position(&self, id: SessionId, downloaded: i64, total: i64) {
        let result = self.store().modify(id, |r| {
            r.downloaded = downloaded;
            r.total = total;
        });
        if let Err(e) = result {
            log::debug!("[engine] could not record position of {}: {}", id, e);
        }
    }

    async fn transfer(&self, id: SessionId) -> Result<TransferEnd, DownloadFailure> {
        let record = self
            .store()
            .modify(id, |r| {
                r.status = Status::Downloading;
                r.error = None;
            })
            .map_err(store_failure)?;
        self.notify(&record, Reason::DownloadStarted);

        let path = PathBuf::from(&record.file);
        let resume_from = if record.downloaded > 0 {
            tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let mut request = self.client.get(&record.url);
        if resume_from > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", resume_from));
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(TransferEnd::Cancelled),
            sent = request.send() => sent.map_err(request_failure)?,
        };

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = response.text().await.ok();
            let error_body = body
                .as_deref()
                .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok());
            log::warn!("[engine] {} answered {} for download {}", record.url, code, id);
            return Err(DownloadFailure::with_response(
                FailureKind::RequestNotSuccessful,
                HttpResponse::new(code, error_body),
            ));
        }

        let resuming = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
        let start = if resuming { resume_from } else { 0 };
        let total = response
            .content_length()
            .map(|len| (len + start) as i64)
            .unwrap_or(-1);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| disk_failure(FailureKind::FileNotCreated, e))?;
            }
        }
        let opened = if resuming {
            log::info!("[engine] resuming download {} at byte {}", id, start);
            tokio::fs::OpenOptions::new().append(true).open(&path).await
        } else {
            tokio::fs::File::create(&path).await
        };
        let mut file = opened.map_err(|e| disk_failure(FailureKind::FileNotCreated, e))?;

        let mut downloaded = start as i64;
        let mut speed = 0.0_f64;
        let mut window_bytes: u64 = 0;
        let mut last_report = Instant::now();
        let mut stream = response.bytes_stream();
        self.record_position(id, downloaded, total);

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = file.flush().await;
                    self.record_position(id, downloaded, total);
                    return Ok(TransferEnd::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(request_failure)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| disk_failure(FailureKind::WriteFailed, e))?;
            downloaded += chunk.len() as i64;
            window_bytes += chunk.len() as u64;

            let elapsed = last_report.elapsed();
            if elapsed >= self.config.progress_interval && !elapsed.is_zero() {
                let instant_speed = window_bytes as f64 / elapsed.as_secs_f64();
                speed = if speed == 0.0 {
                    instant_speed
                } else {
                    EMA_ALPHA * instant_speed + (1.0 - EMA_ALPHA) * speed
                };
                window_bytes = 0;
                last_report = Instant::now();

                let eta = eta_ms(downloaded, total, speed);
                let record = self
                    .store()
                    .modify(id, |r| {
                        r.downloaded = downloaded;
                        r.total = total;
                        r.bytes_per_second = speed as i64;
                        r.eta_ms = eta;
                    })
                    .map_err(store_failure)?;
                self.notify(&record, Reason::DownloadProgressChanged);
            }
        }

        file.flush()
            .await
            .map_err(|e| disk_failure(FailureKind::WriteFailed, e))?;
        if downloaded == 0 && total != 0 {
            return Err(DownloadFailure::new(FailureKind::EmptyResponse));
        }

        let record = self
            .store()
            .modify(id, |r| {
                r.downloaded = downloaded;
                r.total = if total < 1 { downloaded } else { total };
                r.status = Status::Completed;
                r.error = None;
                r.eta_ms = 0;
                r.bytes_per_second = 0;
            })
            .map_err(store_failure)?;
        self.notify(&record, Reason::DownloadCompleted);
        Ok(TransferEnd::Completed)
    }
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await
}

fn eta_ms(downloaded: i64, total: i64, bytes_per_second: f64) -> i64 {
    if total < 1 || bytes_per_second <= 0.0 {
        return -1;
    }
    let remaining = (total - downloaded).max(0) as f64;
    (remaining / bytes_per_second * 1000.0) as i64
}

fn request_failure(e: reqwest::Error) -> DownloadFailure {
    log::warn!("[engine] request error: {}", e);
    let kind = if e.is_timeout() {
        FailureKind::ConnectionTimedOut
    } else if e.is_connect() {
        FailureKind::NoNetworkConnection
    } else {
        FailureKind::Unknown
    };
    DownloadFailure::new(kind)
}

fn disk_failure(kind: FailureKind, e: std::io::Error) -> DownloadFailure {
    log::error!("[engine] disk error: {}", e);
    DownloadFailure::new(kind)
}

fn store_failure(e: EngineError) -> DownloadFailure {
    log::debug!("[engine] store unavailable during transfer: {}", e);
    DownloadFailure::new(FailureKind::Unknown)
}

#[async_trait]
impl DownloadEngine for HttpEngine {
    async fn enqueue(&self, request: SessionRequest) -> Result<Session, EngineError> {
        let start = request.download_on_enqueue;
        let (record, inserted) = self.inner.store().insert(DownloadRecord::from_request(&request))?;
        if inserted {
            self.inner.notify(&record, Reason::DownloadAdded);
        }

        let record = if start && !matches!(record.status, Status::Completed | Status::Downloading) {
            let queued = self.inner.store().modify(record.id, |r| {
                r.status = Status::Queued;
                r.error = None;
            })?;
            self.inner.notify(&queued, Reason::DownloadQueued);
            self.inner.spawn_transfer(queued.id);
            queued
        } else {
            record
        };
        self.inner.persist().await;
        Ok(record.to_session())
    }

    fn observe(&self, id: SessionId, observer: Arc<dyn DownloadObserver>) -> Result<(), EngineError> {
        let current = self.inner.store().get(id)?;
        if self.inner.observers.add(id, Arc::clone(&observer)) {
            if let Some(record) = current {
                self.inner
                    .observers
                    .notify_one(&observer, record.to_notification(Reason::ObserverAttached));
            }
        }
        Ok(())
    }

    fn unobserve(&self, id: SessionId, handle: ObserverHandle) -> Result<(), EngineError> {
        self.inner.observers.remove(id, handle);
        Ok(())
    }

    async fn retry(&self, id: SessionId) -> Result<(), EngineError> {
        let record = self.inner.store().get(id)?.ok_or(EngineError::NotFound(id))?;
        if !record.status.is_retryable() {
            log::debug!("[engine] retry of {} ignored in status {:?}", id, record.status);
            return Ok(());
        }
        let queued = self.inner.store().modify(id, |r| {
            r.status = Status::Queued;
            r.error = None;
        })?;
        self.inner.notify(&queued, Reason::DownloadQueued);
        self.inner.spawn_transfer(id);
        self.inner.persist().await;
        Ok(())
    }

    async fn write_extras(
        &self,
        id: SessionId,
        key: String,
        value: ExtraValue,
    ) -> Result<Extras, EngineError> {
        let record = self.inner.store().put_extra(id, key, value)?;
        self.inner.persist().await;
        Ok(record.extras)
    }

    async fn write_extras_bulk(&self, id: SessionId, extras: Extras) -> Result<Extras, EngineError> {
        let record = self.inner.store().replace_extras(id, extras)?;
        self.inner.persist().await;
        Ok(record.extras)
    }

    async fn delete_extras_by_key(
        &self,
        ids: Vec<SessionId>,
        key: String,
    ) -> Result<Vec<SessionId>, EngineError> {
        let touched = self.inner.store().delete_extra_by_key(&ids, &key)?;
        self.inner.persist().await;
        Ok(touched.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: SessionId) -> Result<Option<DownloadRecord>, EngineError> {
        self.inner.store().get(id)
    }

    async fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.persist().await;
        self.inner.observers.clear();
        self.inner.store().close();
        log::info!("[engine] {} closed", self.inner.config.namespace);
    }
}
