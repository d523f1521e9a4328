//! Per-document broadcast of the newest analysis result.
//!
//! Each open document owns one `watch` channel. Publishing a result wakes
//! every waiter of that document at once; each waiter re-checks its own
//! minimum version, so no polling is involved.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{CoordinatorError, Result};
use crate::model::{AnalysisResult, DocumentId, Version};

/// What waiters observe for one document
#[derive(Debug)]
pub struct ResultSlot<P> {
    latest: Option<Arc<AnalysisResult<P>>>,
    closed: bool,
}

impl<P> ResultSlot<P> {
    fn satisfying(&self, min_version: Version) -> Option<&Arc<AnalysisResult<P>>> {
        self.latest.as_ref().filter(|r| r.version >= min_version)
    }
}

/// Outcome of a publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    /// Stored and broadcast to waiters
    Stored,
    /// A newer result is already stored; dropped
    Superseded,
    /// The document was closed; dropped
    Closed,
}

pub struct ResultChannel<P> {
    tx: watch::Sender<ResultSlot<P>>,
}

impl<P> ResultChannel<P> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ResultSlot {
            latest: None,
            closed: false,
        });
        Self { tx }
    }

    /// Store `result` unless an equal-or-newer version would be replaced by an
    /// older one. The stored version never goes backwards.
    pub fn publish(&self, result: AnalysisResult<P>) -> Published {
        let mut outcome = Published::Closed;
        self.tx.send_if_modified(|slot| {
            if slot.closed {
                return false;
            }
            if let Some(current) = &slot.latest {
                if current.version > result.version {
                    outcome = Published::Superseded;
                    return false;
                }
            }
            slot.latest = Some(Arc::new(result));
            outcome = Published::Stored;
            true
        });
        outcome
    }

    /// Freeze the slot and wake every waiter
    pub fn close(&self) {
        self.tx.send_if_modified(|slot| {
            if slot.closed {
                false
            } else {
                slot.closed = true;
                true
            }
        });
    }

    pub fn latest(&self) -> Option<Arc<AnalysisResult<P>>> {
        self.tx.borrow().latest.clone()
    }

    pub fn waiter(&self, id: DocumentId) -> ResultWaiter<P> {
        ResultWaiter {
            id,
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live waiters
    pub fn waiter_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<P> Default for ResultChannel<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// One registered interest in a document's results
pub struct ResultWaiter<P> {
    id: DocumentId,
    rx: watch::Receiver<ResultSlot<P>>,
}

impl<P> ResultWaiter<P> {
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Resolve with the first result at `min_version` or later, or with
    /// `DocumentClosed` once the document goes away. A result already in the
    /// slot is returned without suspending.
    pub async fn wait(&mut self, min_version: Version) -> Result<Arc<AnalysisResult<P>>> {
        let slot = self
            .rx
            .wait_for(|slot| slot.closed || slot.satisfying(min_version).is_some())
            .await
            .map_err(|_| CoordinatorError::DocumentClosed(self.id.clone()))?;
        match slot.satisfying(min_version) {
            Some(result) => Ok(Arc::clone(result)),
            None => Err(CoordinatorError::DocumentClosed(self.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn doc() -> DocumentId {
        DocumentId::parse("file:///d1.py").unwrap()
    }

    fn result(version: u64, payload: &'static str) -> AnalysisResult<&'static str> {
        AnalysisResult {
            id: doc(),
            version: Version::new(version),
            payload,
            computed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ready_result_resolves_immediately() {
        let channel = ResultChannel::new();
        assert_eq!(channel.publish(result(0, "x=1")), Published::Stored);
        let mut waiter = channel.waiter(doc());
        let r = waiter.wait(Version::BASELINE).await.unwrap();
        assert_eq!(r.payload, "x=1");
    }

    #[tokio::test]
    async fn stale_result_does_not_satisfy() {
        let channel = Arc::new(ResultChannel::new());
        channel.publish(result(0, "old"));
        let mut waiter = channel.waiter(doc());
        let pending = tokio::spawn(async move { waiter.wait(Version::new(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        channel.publish(result(1, "new"));
        let r = pending.await.unwrap().unwrap();
        assert_eq!(r.version, Version::new(1));
        assert_eq!(r.payload, "new");
    }

    #[tokio::test]
    async fn older_publish_never_overwrites_newer() {
        let channel = ResultChannel::new();
        assert_eq!(channel.publish(result(3, "c3")), Published::Stored);
        assert_eq!(channel.publish(result(1, "c1")), Published::Superseded);
        assert_eq!(channel.latest().unwrap().payload, "c3");
        // Same version may be refreshed.
        assert_eq!(channel.publish(result(3, "c3 again")), Published::Stored);
        assert_eq!(channel.latest().unwrap().payload, "c3 again");
    }

    #[tokio::test]
    async fn fan_out_to_all_waiters() {
        let channel = Arc::new(ResultChannel::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let mut waiter = channel.waiter(doc());
            handles.push(tokio::spawn(async move {
                waiter.wait(Version::BASELINE).await
            }));
        }
        assert_eq!(channel.waiter_count(), 4);
        channel.publish(result(0, "shared"));
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn close_resolves_pending_waiters() {
        let channel = Arc::new(ResultChannel::<&'static str>::new());
        let mut waiter = channel.waiter(doc());
        let pending = tokio::spawn(async move { waiter.wait(Version::BASELINE).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close();
        assert_eq!(
            pending.await.unwrap(),
            Err(CoordinatorError::DocumentClosed(doc()))
        );
        assert_eq!(channel.publish(result(0, "late")), Published::Closed);
        assert!(channel.latest().is_none());
    }

    #[tokio::test]
    async fn dropped_channel_counts_as_closed() {
        let channel = ResultChannel::<&'static str>::new();
        let mut waiter = channel.waiter(doc());
        drop(channel);
        assert_eq!(
            waiter.wait(Version::BASELINE).await,
            Err(CoordinatorError::DocumentClosed(doc()))
        );
    }
}
