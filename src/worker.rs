//! The single background consumer of the analysis queue.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::Analyzer;
use crate::events::EventSink;
use crate::model::{DocumentId, LogEvent, Severity};
use crate::queue::AnalysisQueue;
use crate::results::Published;
use crate::store::DocumentStore;

/// What happened to one dequeued identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Published(Published),
    /// Closed before the worker read it
    NotOpen,
    /// The analyzer returned an error or panicked
    Failed,
}

pub struct AnalysisWorker<A: Analyzer> {
    analyzer: Arc<A>,
    store: Arc<DocumentStore<A::Payload>>,
    queue: Arc<AnalysisQueue>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    announce_results: bool,
}

impl<A: Analyzer> AnalysisWorker<A> {
    pub fn new(
        analyzer: Arc<A>,
        store: Arc<DocumentStore<A::Payload>>,
        queue: Arc<AnalysisQueue>,
        events: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            analyzer,
            store,
            queue,
            events,
            shutdown,
            announce_results: false,
        }
    }

    /// Emit an `Info` event for every stored result
    pub fn announce_results(mut self, announce: bool) -> Self {
        self.announce_results = announce;
        self
    }

    /// Process queue items one at a time until shutdown
    pub async fn run(self) {
        info!("analysis worker started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.queue.dequeue() => next,
            };
            match next {
                Ok(id) => {
                    self.process(&id).await;
                }
                Err(_) => break,
            }
        }
        info!("analysis worker stopped");
    }

    /// Analyze the current version of `id` and publish the result
    pub async fn process(&self, id: &DocumentId) -> ItemOutcome {
        let snapshot = match self.store.snapshot(id) {
            Ok(snapshot) => snapshot,
            Err(_) => {
                debug!(document = %id, "closed before analysis, skipping");
                return ItemOutcome::NotOpen;
            }
        };
        let version = snapshot.version;
        debug!(document = %id, %version, "analysis started");

        // Run on its own task so a panicking analyzer cannot take the loop down.
        let analyzer = Arc::clone(&self.analyzer);
        let content = Arc::clone(&snapshot.content);
        let task = tokio::spawn(async move { analyzer.analyze(&content, version).await });

        let payload = match task.await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!(document = %id, %version, "analysis failed: {e:#}");
                self.events.emit(LogEvent::new(
                    Severity::Error,
                    format!("Analysis of {id} at {version} failed: {e:#}"),
                ));
                return ItemOutcome::Failed;
            }
            Err(join_error) => {
                warn!(document = %id, %version, "analysis panicked: {join_error}");
                self.events.emit(LogEvent::new(
                    Severity::Error,
                    format!("Analysis of {id} at {version} panicked: {join_error}"),
                ));
                return ItemOutcome::Failed;
            }
        };

        let published = self.store.publish(&snapshot, payload);
        match published {
            Published::Stored => {
                debug!(document = %id, %version, "analysis published");
                if self.announce_results {
                    self.events.emit(LogEvent::new(
                        Severity::Info,
                        format!("Analysis of {id} at {version} is ready"),
                    ));
                }
            }
            Published::Superseded => {
                debug!(document = %id, %version, "newer result already published, dropped")
            }
            Published::Closed => debug!(document = %id, %version, "closed during analysis, dropped"),
        }
        ItemOutcome::Published(published)
    }
}
