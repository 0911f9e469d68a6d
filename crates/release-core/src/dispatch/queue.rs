//! Deferred re-evaluation queue.
//!
//! Contended or not-yet-visible targets are pushed here instead of being
//! retried inline. A target already waiting in the queue is not queued
//! twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use release_state::ReleaseTargetId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EvaluationQueue {
    sender: mpsc::Sender<ReleaseTargetId>,
    pending: Arc<Mutex<HashSet<ReleaseTargetId>>>,
}

/// Receiving half, drained by the re-evaluation worker.
#[derive(Debug)]
pub struct EvaluationReceiver {
    receiver: mpsc::Receiver<ReleaseTargetId>,
    pending: Arc<Mutex<HashSet<ReleaseTargetId>>>,
}

impl EvaluationQueue {
    pub fn new(capacity: usize) -> (Self, EvaluationReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                sender,
                pending: Arc::clone(&pending),
            },
            EvaluationReceiver { receiver, pending },
        )
    }

    /// Queue `id` for re-evaluation. Returns `false` if it was already
    /// queued or the queue is full or closed.
    pub fn enqueue(&self, id: ReleaseTargetId) -> bool {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if !pending.insert(id) {
                return false;
            }
        }
        match self.sender.try_send(id) {
            Ok(()) => true,
            Err(err) => {
                self.pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                match err {
                    TrySendError::Full(_) => {
                        warn!(release_target_id = %id, "re-evaluation queue full, dropping")
                    }
                    TrySendError::Closed(_) => {
                        warn!(release_target_id = %id, "re-evaluation queue closed")
                    }
                }
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvaluationReceiver {
    fn take(&self, id: ReleaseTargetId) -> ReleaseTargetId {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        id
    }

    /// Wait for the next queued target. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ReleaseTargetId> {
        let id = self.receiver.recv().await?;
        Some(self.take(id))
    }

    /// Everything queued right now, without waiting.
    pub fn drain(&mut self) -> Vec<ReleaseTargetId> {
        let mut out = Vec::new();
        while let Ok(id) = self.receiver.try_recv() {
            out.push(self.take(id));
        }
        out
    }
}
