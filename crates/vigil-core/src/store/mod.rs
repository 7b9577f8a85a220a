// ── Cached state document ──
//
// Single merge point for the pull path (snapshots) and the push path
// (stream events). The store is the only writer of the document; both
// entry points run under one non-reentrant lock, so a snapshot apply
// and an event apply never interleave.

mod reconcile;

use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use vigil_api::StateDocument;

pub use reconcile::{AppliedChange, EventOutcome, SnapshotOutcome};

/// Owner of the cached state document for one installation.
///
/// Created empty; populated by the first snapshot; mutated in place for
/// the life of the session. Consumers read merged snapshots through
/// [`document`](Self::document) or subscribe via
/// [`subscribe`](Self::subscribe) -- they must treat what they receive
/// as immutable.
pub struct StateStore {
    doc: Mutex<StateDocument>,
    data_tx: watch::Sender<Arc<StateDocument>>,
}

impl StateStore {
    pub fn new() -> Self {
        let (data_tx, _) = watch::channel(Arc::new(StateDocument::default()));
        Self {
            doc: Mutex::new(StateDocument::default()),
            data_tx,
        }
    }

    /// The latest merged document.
    pub fn document(&self) -> Arc<StateDocument> {
        self.data_tx.borrow().clone()
    }

    /// Subscribe to merged-document updates.
    ///
    /// A new snapshot arrives on the receiver after every mutation that
    /// actually changed something. Last-value semantics: a receiver
    /// that falls behind sees only the most recent document.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StateDocument>> {
        self.data_tx.subscribe()
    }

    /// `send_replace`, not `send`: the channel doubles as the storage
    /// behind [`document`](Self::document) and must hold the latest
    /// merge result even when no subscriber exists.
    fn publish(&self, doc: &StateDocument) {
        self.data_tx.send_replace(Arc::new(doc.clone()));
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
