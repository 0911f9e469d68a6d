//! Non-blocking per-target evaluation leases.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use release_state::ReleaseTargetId;

/// Set of release targets currently being evaluated.
#[derive(Debug, Clone, Default)]
pub struct LeaseTable {
    held: Arc<Mutex<HashSet<ReleaseTargetId>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `id`, or `None` if another evaluation holds it.
    /// Never waits.
    pub fn try_acquire(&self, id: ReleaseTargetId) -> Option<Lease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(id).then(|| Lease {
            id,
            table: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, id: &ReleaseTargetId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}

/// Exclusive right to evaluate one release target; released on drop.
#[derive(Debug)]
pub struct Lease {
    id: ReleaseTargetId,
    table: Arc<Mutex<HashSet<ReleaseTargetId>>>,
}

impl Lease {
    pub fn release_target_id(&self) -> ReleaseTargetId {
        self.id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
