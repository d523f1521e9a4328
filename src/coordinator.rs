//! Public face of the analysis pipeline.
//!
//! Document notifications go to the store (which queues the document), the
//! worker publishes results per document, and `wait_for_analysis` suspends a
//! caller until a result at least as new as the version it asked for exists.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::Analyzer;
use crate::config::Config;
use crate::error::{CoordinatorError, Result};
use crate::events::EventSink;
use crate::model::{AnalysisResult, DocumentId, LogEvent, Severity, Version};
use crate::queue::{AnalysisQueue, Enqueued};
use crate::store::DocumentStore;
use crate::worker::AnalysisWorker;

pub type SharedResult<A> = Arc<AnalysisResult<<A as Analyzer>::Payload>>;

pub struct AnalysisCoordinator<A: Analyzer> {
    store: Arc<DocumentStore<A::Payload>>,
    queue: Arc<AnalysisQueue>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: Config,
}

impl<A: Analyzer> AnalysisCoordinator<A> {
    /// Build the coordinator and spawn its worker on the current tokio runtime
    pub fn start(analyzer: A, events: Arc<dyn EventSink>, config: Config) -> Self {
        let queue = Arc::new(AnalysisQueue::new());
        let store = Arc::new(DocumentStore::new(Arc::clone(&queue)));
        let shutdown = CancellationToken::new();

        let worker = AnalysisWorker::new(
            Arc::new(analyzer),
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&events),
            shutdown.child_token(),
        )
        .announce_results(config.analysis_updates);
        let handle = tokio::spawn(worker.run());

        events.emit(LogEvent::new(Severity::Log, "Analysis coordinator started"));
        Self {
            store,
            queue,
            events,
            shutdown,
            worker: Mutex::new(Some(handle)),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            Err(CoordinatorError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub fn notify_opened(&self, id: &DocumentId, content: &str) -> Result<Version> {
        self.ensure_running()?;
        let version = self.store.open(id, content)?;
        self.events
            .emit(LogEvent::new(Severity::Log, format!("Opened {id}")));
        Ok(version)
    }

    pub fn notify_changed(&self, id: &DocumentId, content: &str) -> Result<Version> {
        self.ensure_running()?;
        self.store.change(id, content)
    }

    pub fn notify_closed(&self, id: &DocumentId) -> Result<()> {
        self.ensure_running()?;
        self.store.close(id)?;
        self.events
            .emit(LogEvent::new(Severity::Log, format!("Closed {id}")));
        Ok(())
    }

    /// Queue an open document for re-analysis without changing it
    pub fn enqueue(&self, id: &DocumentId) -> Result<Enqueued> {
        self.ensure_running()?;
        if !self.store.contains(id) {
            return Err(CoordinatorError::NotOpen(id.clone()));
        }
        Ok(self.queue.enqueue(id))
    }

    /// Queue several documents; stops at the first one that is not open
    pub fn enqueue_many<'a>(&self, ids: impl IntoIterator<Item = &'a DocumentId>) -> Result<()> {
        for id in ids {
            self.enqueue(id)?;
        }
        Ok(())
    }

    pub fn current_version(&self, id: &DocumentId) -> Result<Version> {
        self.store.version(id)
    }

    /// Current content and version
    pub fn document(&self, id: &DocumentId) -> Result<(Arc<str>, Version)> {
        self.store.get(id)
    }

    /// Newest published result, without waiting
    pub fn latest(&self, id: &DocumentId) -> Result<Option<SharedResult<A>>> {
        self.store.latest(id)
    }

    pub fn open_documents(&self) -> Vec<DocumentId> {
        self.store.ids()
    }

    /// Wait for a result of `id` at `min_version` or later.
    ///
    /// `min_version` defaults to the version current when the call is made.
    /// Resolves with `Timeout`, `Cancelled`, `DocumentClosed` or `Shutdown`
    /// otherwise; an already published qualifying result is returned at once.
    pub async fn wait_for_analysis(
        &self,
        id: &DocumentId,
        min_version: Option<Version>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SharedResult<A>> {
        self.ensure_running()?;
        let (current, mut waiter) = self.store.subscribe(id)?;
        let min_version = min_version.unwrap_or(current);
        debug!(document = %id, %min_version, ?timeout, "waiting for analysis");

        let outcome = tokio::select! {
            biased;
            result = waiter.wait(min_version) => result,
            _ = cancel.cancelled() => Err(CoordinatorError::Cancelled(id.clone())),
            _ = self.shutdown.cancelled() => Err(CoordinatorError::Shutdown),
            _ = tokio::time::sleep(timeout) => Err(CoordinatorError::Timeout {
                id: id.clone(),
                min_version,
                waited: timeout,
            }),
        };
        match &outcome {
            Ok(result) => debug!(document = %id, version = %result.version, "wait satisfied"),
            Err(e) => debug!(document = %id, "wait ended: {e}"),
        }
        outcome
    }

    /// `wait_for_analysis` at the current version, without external cancellation
    pub async fn wait_for_current(
        &self,
        id: &DocumentId,
        timeout: Duration,
    ) -> Result<SharedResult<A>> {
        self.wait_for_analysis(id, None, timeout, &CancellationToken::new())
            .await
    }

    pub async fn open_and_wait(
        &self,
        id: &DocumentId,
        content: &str,
        timeout: Duration,
    ) -> Result<SharedResult<A>> {
        let version = self.notify_opened(id, content)?;
        self.wait_for_analysis(id, Some(version), timeout, &CancellationToken::new())
            .await
    }

    pub async fn change_and_wait(
        &self,
        id: &DocumentId,
        content: &str,
        timeout: Duration,
    ) -> Result<SharedResult<A>> {
        let version = self.notify_changed(id, content)?;
        self.wait_for_analysis(id, Some(version), timeout, &CancellationToken::new())
            .await
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the worker and fail every pending wait with `Shutdown`.
    ///
    /// An analysis already running is allowed to finish; nothing queued
    /// behind it is processed. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.queue.shutdown();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("analysis worker ended abnormally: {e}");
            }
        }
        info!("analysis coordinator shut down");
        self.events
            .emit(LogEvent::new(Severity::Log, "Analysis coordinator shut down"));
    }
}

impl<A: Analyzer> Drop for AnalysisCoordinator<A> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.queue.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    /// Holds every analysis until a permit is released
    struct Gated {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Analyzer for Gated {
        type Payload = String;

        async fn analyze(&self, content: &str, version: Version) -> anyhow::Result<String> {
            self.gate.acquire().await?.forget();
            Ok(format!("{content}@{version}"))
        }
    }

    fn doc() -> DocumentId {
        DocumentId::parse("file:///d1.py").unwrap()
    }

    fn gated() -> (AnalysisCoordinator<Gated>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator = AnalysisCoordinator::start(
            Gated {
                gate: Arc::clone(&gate),
            },
            Arc::new(NullSink),
            Config::default(),
        );
        (coordinator, gate)
    }

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn zero_timeout_without_result_times_out() {
        let (coordinator, _gate) = gated();
        coordinator.notify_opened(&doc(), "x=1").unwrap();
        let err = coordinator
            .wait_for_current(&doc(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Timeout { min_version, .. } if min_version == Version::BASELINE));
    }

    #[tokio::test]
    async fn zero_timeout_with_ready_result_resolves() {
        let (coordinator, gate) = gated();
        gate.add_permits(1);
        let first = coordinator.open_and_wait(&doc(), "x=1", LONG).await.unwrap();
        let again = coordinator
            .wait_for_current(&doc(), Duration::ZERO)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[tokio::test]
    async fn cancellation_resolves_wait() {
        let (coordinator, _gate) = gated();
        coordinator.notify_opened(&doc(), "x=1").unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = coordinator
            .wait_for_analysis(&doc(), None, LONG, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::Cancelled(doc()));
    }

    #[tokio::test]
    async fn shutdown_fails_pending_waits() {
        let (coordinator, gate) = gated();
        let coordinator = Arc::new(coordinator);
        coordinator.notify_opened(&doc(), "x=1").unwrap();
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_current(&doc(), LONG).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The worker is parked inside the gated analysis; shutdown must not hang on it
        // once the gate opens.
        let stopper = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.shutdown().await })
        };
        assert_eq!(waiter.await.unwrap().unwrap_err(), CoordinatorError::Shutdown);
        gate.add_permits(1);
        stopper.await.unwrap();

        assert!(coordinator.is_shut_down());
        assert_eq!(
            coordinator.notify_changed(&doc(), "x=2"),
            Err(CoordinatorError::Shutdown)
        );
        assert_eq!(
            coordinator.wait_for_current(&doc(), LONG).await.unwrap_err(),
            CoordinatorError::Shutdown
        );
    }

    #[tokio::test]
    async fn enqueue_requires_open_document() {
        let (coordinator, gate) = gated();
        assert_eq!(
            coordinator.enqueue(&doc()),
            Err(CoordinatorError::NotOpen(doc()))
        );
        gate.add_permits(2);
        let first = coordinator.open_and_wait(&doc(), "x=1", LONG).await.unwrap();
        coordinator.enqueue_many([&doc()]).unwrap();

        // Re-analysis of the unchanged document republishes the same version.
        let deadline = tokio::time::Instant::now() + LONG;
        loop {
            let latest = coordinator.latest(&doc()).unwrap().unwrap();
            if !Arc::ptr_eq(&latest, &first) {
                assert_eq!(latest.version, first.version);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn document_accessors() {
        let (coordinator, _gate) = gated();
        coordinator.notify_opened(&doc(), "x=1").unwrap();
        assert_eq!(coordinator.notify_changed(&doc(), "x=2"), Ok(Version::new(1)));
        let (content, version) = coordinator.document(&doc()).unwrap();
        assert_eq!((&*content, version), ("x=2", Version::new(1)));
        assert_eq!(coordinator.current_version(&doc()), Ok(Version::new(1)));
        assert_eq!(coordinator.open_documents(), vec![doc()]);
        assert!(coordinator.latest(&doc()).unwrap().is_none());
        coordinator.notify_closed(&doc()).unwrap();
        assert!(coordinator.open_documents().is_empty());
    }
}
