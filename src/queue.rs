//! FIFO of documents awaiting analysis, coalescing repeated enqueues.
//!
//! An entry carries only the identity. The worker reads the document's
//! version when it picks the entry up, so any number of edits made while an
//! entry is waiting collapse into one analysis of the newest content.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{CoordinatorError, Result};
use crate::model::DocumentId;

/// Outcome of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended at the back of the queue
    Added,
    /// Already waiting; nothing added
    Coalesced,
    /// Queue is shut down; nothing added
    Rejected,
}

struct QueueState {
    order: VecDeque<DocumentId>,
    pending: HashSet<DocumentId>,
    shut_down: bool,
}

/// Many producers, one consumer
pub struct AnalysisQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl AnalysisQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                pending: HashSet::new(),
                shut_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Non-blocking enqueue
    pub fn enqueue(&self, id: &DocumentId) -> Enqueued {
        let outcome = {
            let mut state = self.state.lock();
            if state.shut_down {
                Enqueued::Rejected
            } else if state.pending.contains(id) {
                Enqueued::Coalesced
            } else {
                state.pending.insert(id.clone());
                state.order.push_back(id.clone());
                Enqueued::Added
            }
        };
        match outcome {
            Enqueued::Added => {
                debug!(document = %id, "queued for analysis");
                self.notify.notify_one();
            }
            Enqueued::Coalesced => debug!(document = %id, "already queued, coalesced"),
            Enqueued::Rejected => debug!(document = %id, "queue shut down, enqueue dropped"),
        }
        outcome
    }

    /// Wait for the next identity. Fails with `Shutdown` once `shutdown` ran.
    pub async fn dequeue(&self) -> Result<DocumentId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a notify between check and await is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.shut_down {
                    return Err(CoordinatorError::Shutdown);
                }
                if let Some(id) = state.order.pop_front() {
                    state.pending.remove(&id);
                    return Ok(id);
                }
            }
            notified.await;
        }
    }

    /// Drop an identity that has not been picked up yet (document closed)
    pub fn remove(&self, id: &DocumentId) -> bool {
        let mut state = self.state.lock();
        if state.pending.remove(id) {
            state.order.retain(|queued| queued != id);
            true
        } else {
            false
        }
    }

    /// Reject further work and wake the consumer
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shut_down = true;
            state.order.clear();
            state.pending.clear();
        }
        self.notify.notify_waiters();
        // notify_waiters stores no permit; cover a consumer not yet parked.
        self.notify.notify_one();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AnalysisQueue {
    fn default() -> Self {
        Self::new()
    }
}
