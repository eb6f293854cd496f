//! Capture pipeline orchestration for proxied connections.
//!
//! [`CapturePipeline::handle`] wraps a connection in a [`DuplexTee`], runs the
//! next handler on it, and once that handler returns hands the two sealed
//! captures to a background archival job that builds, renders and stores the
//! WARC archive.
//!
//! ```text
//! Idle -> Streaming -> Draining -> Archiving -> Stored | Failed
//!   |         |            |            |
//!   |         |            |            +-- render through a pipe, Storage::store
//!   |         |            +-- both drains sealed (bounded by drain_timeout)
//!   |         +-- next handler runs on the tee
//!   +-- drains spawned before the tee exists
//! ```
//!
//! Archival never influences the result returned to the caller: the next
//! handler's own `io::Result` is passed through unchanged. Every archival job
//! is tracked and either completes or is aborted with a logged count in
//! [`CapturePipeline::shutdown`].

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use uuid::Uuid;

use super::capture_stream::capture_stream;
use super::context::ConnectionContext;
use super::tee::DuplexTee;
use super::types::{CaptureState, CapturedMessage, Direction};
use crate::archive::identity::{IdentityProvider, SystemIdentity};
use crate::archive::renderer::WarcRenderer;
use crate::archive::types::Archive;
use crate::error_handling::types::{ArchiveError, CaptureError, ConfigError, RenderError};
use crate::storage::storage_trait::Storage;

pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOG_TARGET: &str = "warctap::capture";
const RENDER_PIPE_CAPACITY: usize = 64 * 1024;

/// Byte stream handed to the next handler; same contract as the original
/// connection.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> ProxyStream for T {}

/// The next handler in the chain, e.g. a forwarder to the real destination.
#[async_trait]
pub trait NextHandler: Send + Sync {
    async fn handle(
        &self,
        conn: &mut dyn ProxyStream,
        ctx: &ConnectionContext,
    ) -> io::Result<()>;
}

/// Result of one archival job.
#[derive(Debug)]
pub struct ArchiveOutcome {
    pub session_id: Uuid,
    pub result: Result<String, ArchiveError>,
}

impl ArchiveOutcome {
    pub fn state(&self) -> CaptureState {
        match self.result {
            Ok(_) => CaptureState::Stored,
            Err(_) => CaptureState::Failed,
        }
    }
}

/// Counts reported by [`CapturePipeline::shutdown`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stored: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl ShutdownReport {
    fn record(&mut self, joined: Result<ArchiveOutcome, JoinError>) {
        match joined {
            Ok(outcome) if outcome.result.is_ok() => self.stored += 1,
            _ => self.failed += 1,
        }
    }
}

pub struct CapturePipelineBuilder {
    storage: Option<Arc<dyn Storage>>,
    identity: Arc<dyn IdentityProvider>,
    source_identity: String,
    max_capture_bytes: usize,
    drain_timeout: Duration,
    handler_timeout: Option<Duration>,
    log_target: String,
}

impl Default for CapturePipelineBuilder {
    fn default() -> Self {
        Self {
            storage: None,
            identity: Arc::new(SystemIdentity),
            source_identity: String::new(),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            handler_timeout: None,
            log_target: DEFAULT_LOG_TARGET.to_string(),
        }
    }
}

impl CapturePipelineBuilder {
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn source_identity(mut self, source_identity: impl Into<String>) -> Self {
        self.source_identity = source_identity.into();
        self
    }

    pub fn max_capture_bytes(mut self, limit: usize) -> Self {
        self.max_capture_bytes = limit;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Upper bound on how long the next handler may run. `None` disables it.
    pub fn handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Log target every pipeline message is emitted under.
    pub fn log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    /// Errors
    /// - [`ConfigError::MissingStorage`] when no backend was supplied.
    /// - [`ConfigError::NotInRange`] for a zero capture limit.
    pub fn build(self) -> Result<CapturePipeline, ConfigError> {
        let storage = self.storage.ok_or(ConfigError::MissingStorage)?;
        if self.max_capture_bytes == 0 {
            return Err(ConfigError::NotInRange(
                "max_capture_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(CapturePipeline {
            shared: Arc::new(Shared {
                storage,
                identity: self.identity,
                renderer: WarcRenderer::new(),
                source_identity: self.source_identity,
                drain_timeout: self.drain_timeout,
                log_target: self.log_target,
            }),
            max_capture_bytes: self.max_capture_bytes,
            handler_timeout: self.handler_timeout,
            archivals: Mutex::new(JoinSet::new()),
        })
    }
}

/// State the archival jobs need after the connection is gone.
struct Shared {
    storage: Arc<dyn Storage>,
    identity: Arc<dyn IdentityProvider>,
    renderer: WarcRenderer,
    source_identity: String,
    drain_timeout: Duration,
    log_target: String,
}

pub struct CapturePipeline {
    shared: Arc<Shared>,
    max_capture_bytes: usize,
    handler_timeout: Option<Duration>,
    archivals: Mutex<JoinSet<ArchiveOutcome>>,
}

impl CapturePipeline {
    pub fn builder() -> CapturePipelineBuilder {
        CapturePipelineBuilder::default()
    }

    /// Runs `next` on a tee-wrapped `conn` and schedules archival of both
    /// directions once it returns.
    ///
    /// Returns exactly what `next` returned (or `TimedOut` if the handler
    /// timeout fired); archival outcome is only logged. If this future is
    /// dropped before `next` returns, whatever was captured so far is still
    /// archived.
    pub async fn handle<S, H>(&self, conn: S, ctx: &ConnectionContext, next: &H) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        H: NextHandler + ?Sized,
    {
        let session_id = ctx.session_id;
        let target = self.shared.log_target.as_str();

        let (request_sink, request_drain) =
            capture_stream(session_id, Direction::Request, self.max_capture_bytes, target);
        let (response_sink, response_drain) =
            capture_stream(session_id, Direction::Response, self.max_capture_bytes, target);
        let mut pending = PendingArchival {
            pipeline: self,
            job: Some(ArchiveJob {
                shared: Arc::clone(&self.shared),
                session_id,
                target_uri: ctx.target_uri(),
                request_ts: ctx.accepted_at,
                response_ts: ctx.accepted_at,
                request_task: tokio::spawn(request_drain.drain()),
                response_task: tokio::spawn(response_drain.drain()),
            }),
        };
        debug!(
            target: target,
            "[{}] capture {} -> {} ({})",
            session_id,
            CaptureState::Idle,
            CaptureState::Streaming,
            ctx.client_addr
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown peer".to_string())
        );

        let mut tee = DuplexTee::new(conn, request_sink, response_sink);
        let result = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, next.handle(&mut tee, ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target: target,
                        "[{}] connection handler exceeded {:?}; archiving what was transferred",
                        session_id,
                        limit
                    );
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connection handler timed out",
                    ))
                }
            },
            None => next.handle(&mut tee, ctx).await,
        };

        if tee.request_open() {
            debug!(
                target: target,
                "[{}] connection ended before client end-of-stream; request capture is partial",
                session_id
            );
        }
        tee.seal();
        drop(tee);

        if let Err(e) = &result {
            debug!(target: target, "[{}] next handler returned error: {}", session_id, e);
        }
        pending.submit();

        result
    }

    /// Archival jobs not yet reaped.
    pub fn pending_archivals(&self) -> usize {
        self.lock_archivals().len()
    }

    /// Waits up to `grace` for in-flight archivals, then aborts the rest.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let target = self.shared.log_target.as_str();
        let mut set = std::mem::take(&mut *self.lock_archivals());
        let mut report = ShutdownReport::default();

        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = set.join_next().await {
                report.record(joined);
            }
        })
        .await;

        if finished.is_err() {
            report.abandoned = set.len();
            warn!(
                target: target,
                "abandoning {} archival job(s) still running after {:?}",
                report.abandoned,
                grace
            );
            set.abort_all();
        }

        info!(
            target: target,
            "archival shutdown: stored={}, failed={}, abandoned={}",
            report.stored,
            report.failed,
            report.abandoned
        );
        report
    }

    fn lock_archivals(&self) -> MutexGuard<'_, JoinSet<ArchiveOutcome>> {
        self.archivals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_archival(&self, job: ArchiveJob) {
        let target = self.shared.log_target.as_str();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(
                    target: target,
                    "[{}] capture {}: no runtime to archive on: {}",
                    job.session_id,
                    CaptureState::Failed,
                    e
                );
                return;
            }
        };
        let mut set = self.lock_archivals();
        while let Some(joined) = set.try_join_next() {
            if let Err(e) = joined {
                error!(target: target, "archival task ended abnormally: {}", e);
            }
        }
        set.spawn_on(job.run(), &runtime);
    }
}

/// Owns the archival job of one connection until it is handed to the
/// pipeline, either after the next handler returns or when `handle` is
/// dropped mid-connection.
struct PendingArchival<'a> {
    pipeline: &'a CapturePipeline,
    job: Option<ArchiveJob>,
}

impl PendingArchival<'_> {
    fn submit(&mut self) {
        if let Some(mut job) = self.job.take() {
            job.response_ts = self.pipeline.shared.identity.now();
            self.pipeline.spawn_archival(job);
        }
    }
}

impl Drop for PendingArchival<'_> {
    fn drop(&mut self) {
        if let Some(job) = &self.job {
            warn!(
                target: self.pipeline.shared.log_target.as_str(),
                "[{}] connection cancelled before its handler returned; archiving partial capture",
                job.session_id
            );
            self.submit();
        }
    }
}

struct ArchiveJob {
    shared: Arc<Shared>,
    session_id: Uuid,
    target_uri: String,
    request_ts: DateTime<Utc>,
    response_ts: DateTime<Utc>,
    request_task: JoinHandle<Result<Vec<u8>, CaptureError>>,
    response_task: JoinHandle<Result<Vec<u8>, CaptureError>>,
}

impl ArchiveJob {
    async fn run(self) -> ArchiveOutcome {
        let shared = Arc::clone(&self.shared);
        let target = shared.log_target.as_str();
        let session_id = self.session_id;

        debug!(
            target: target,
            "[{}] capture {} -> {}",
            session_id,
            CaptureState::Streaming,
            CaptureState::Draining
        );
        let outcome = ArchiveOutcome {
            session_id,
            result: self.archive().await,
        };
        match &outcome.result {
            Ok(key) => info!(
                target: target,
                "[{}] capture {}: {}",
                session_id,
                outcome.state(),
                key
            ),
            Err(e) => error!(
                target: target,
                "[{}] capture {}: {}",
                session_id,
                outcome.state(),
                e
            ),
        }
        outcome
    }

    async fn archive(self) -> Result<String, ArchiveError> {
        let ArchiveJob {
            shared,
            session_id,
            target_uri,
            request_ts,
            response_ts,
            request_task,
            response_task,
        } = self;
        let target = shared.log_target.as_str();

        let request_abort = request_task.abort_handle();
        let response_abort = response_task.abort_handle();
        let drained = tokio::time::timeout(shared.drain_timeout, async move {
            tokio::join!(request_task, response_task)
        })
        .await;
        let (request, response) = match drained {
            Ok(pair) => pair,
            Err(_) => {
                let stalled = if request_abort.is_finished() {
                    Direction::Response
                } else {
                    Direction::Request
                };
                request_abort.abort();
                response_abort.abort();
                return Err(CaptureError::DrainTimedOut(stalled).into());
            }
        };
        let request = request.map_err(|e| CaptureError::DrainFailed(e.to_string()))??;
        let response = response.map_err(|e| CaptureError::DrainFailed(e.to_string()))??;

        debug!(
            target: target,
            "[{}] capture {} -> {}: request={} bytes, response={} bytes",
            session_id,
            CaptureState::Draining,
            CaptureState::Archiving,
            request.len(),
            response.len()
        );

        let archive = Archive::from_capture(
            CapturedMessage::new(request_ts, request),
            CapturedMessage::new(response_ts, response),
            target_uri,
            shared.source_identity.clone(),
            shared.identity.as_ref(),
        );
        let key = archive.storage_key();
        let rendered = render_through_pipe(&shared.renderer, &archive).await?;
        drop(archive);

        let storage = Arc::clone(&shared.storage);
        let stored_key = key.clone();
        tokio::task::spawn_blocking(move || storage.store(&stored_key, &rendered))
            .await
            .map_err(|e| ArchiveError::JoinFailed(e.to_string()))??;

        Ok(key)
    }
}

/// Renders into one end of an in-memory pipe while the other end is
/// consumed concurrently, so a full pipe never stalls the renderer.
async fn render_through_pipe(
    renderer: &WarcRenderer,
    archive: &Archive,
) -> Result<Vec<u8>, ArchiveError> {
    let (mut writer, mut reader) = tokio::io::duplex(RENDER_PIPE_CAPACITY);

    let consume = async move {
        let mut rendered = Vec::with_capacity(archive.total_bytes() + 1024);
        reader.read_to_end(&mut rendered).await.map(|_| rendered)
    };
    let produce = async move {
        let written = renderer.render(archive, &mut writer).await;
        drop(writer);
        written
    };

    let (rendered, written) = tokio::join!(consume, produce);
    written?;
    rendered.map_err(|e| ArchiveError::Render(RenderError::IoError(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_storage::MemoryStorage;
    use tokio::io::AsyncWriteExt;

    struct Echo;

    #[async_trait]
    impl NextHandler for Echo {
        async fn handle(
            &self,
            conn: &mut dyn ProxyStream,
            _ctx: &ConnectionContext,
        ) -> io::Result<()> {
            let mut buf = [0u8; 1024];
            loop {
                let n = conn.read(&mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                conn.write_all(&buf[..n]).await?;
            }
        }
    }

    #[test]
    fn missing_storage_is_fatal() {
        let err = CapturePipeline::builder().build().err().unwrap();
        assert!(matches!(err, ConfigError::MissingStorage));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = CapturePipeline::builder()
            .storage(Arc::new(MemoryStorage::new()))
            .max_capture_bytes(0)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::NotInRange(_)));
    }

    #[tokio::test]
    async fn echo_connection_is_archived() {
        let _ = env_logger::builder().is_test(true).try_init();
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = CapturePipeline::builder()
            .storage(storage.clone())
            .source_identity("node-a")
            .build()
            .unwrap();

        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"marco").await.unwrap();
        client.shutdown().await.unwrap();

        pipeline
            .handle(server, &ConnectionContext::default(), &Echo)
            .await
            .unwrap();

        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"marco");

        let report = pipeline.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report, ShutdownReport { stored: 1, failed: 0, abandoned: 0 });
        assert_eq!(storage.keys().len(), 1);
    }

    #[tokio::test]
    async fn stalled_drain_fails_with_drain_timeout() {
        let pipeline = CapturePipeline::builder()
            .storage(Arc::new(MemoryStorage::new()))
            .drain_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let job = ArchiveJob {
            shared: Arc::clone(&pipeline.shared),
            session_id: Uuid::new_v4(),
            target_uri: String::new(),
            request_ts: Utc::now(),
            response_ts: Utc::now(),
            request_task: tokio::spawn(async { Ok(Vec::new()) }),
            response_task: tokio::spawn(std::future::pending()),
        };

        let outcome = job.run().await;
        assert_eq!(outcome.state(), CaptureState::Failed);
        assert!(matches!(
            outcome.result,
            Err(ArchiveError::Capture(CaptureError::DrainTimedOut(Direction::Response)))
        ));
    }

    #[tokio::test]
    async fn oversized_capture_fails_archival_only() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = CapturePipeline::builder()
            .storage(storage.clone())
            .max_capture_bytes(3)
            .build()
            .unwrap();

        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"too long").await.unwrap();
        client.shutdown().await.unwrap();

        let result = pipeline
            .handle(server, &ConnectionContext::default(), &Echo)
            .await;
        assert!(result.is_ok());

        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"too long");

        let report = pipeline.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.failed, 1);
        assert!(storage.keys().is_empty());
    }
}
