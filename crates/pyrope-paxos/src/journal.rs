//! The crash-durability contract.
//!
//! The engine performs no I/O of its own; everything it must survive a
//! crash with goes through [`Journal`]. A journal stores exactly two
//! things: the accept at each slot, and one [`Progress`] record.
//!
//! # Contract
//!
//! - `journal_accept` is an upsert by slot. Overwriting is permitted only
//!   while the caller has not yet declared the slot fixed; once fixed,
//!   the accept at that slot is immutable. Re-journalling an identical
//!   accept must be a no-op observable only as a redundant sync.
//! - `save_progress` overwrites the single progress record in place.
//! - `sync` blocks until all prior writes are on stable storage. The
//!   engine calls it before any outbound message is released; skipping
//!   that barrier breaks the algorithm.

use std::collections::BTreeMap;

use thiserror::Error;

use pyrope_types::{NodeId, Slot};

use crate::message::Accept;
use crate::types::Progress;

/// Errors a journal implementation may surface.
///
/// A node must not continue to emit messages after a failed journal
/// operation; the engine propagates these to the host.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The backing store failed.
    #[error("journal i/o failure: {reason}")]
    Io { reason: String },

    /// The journal holds no progress record for the node.
    ///
    /// Journals must be pre-initialized with [`Progress::initial`] before
    /// a node is constructed over them.
    #[error("no progress record for node {node}")]
    MissingProgress { node: NodeId },
}

/// Crash-durable storage for accepts and progress.
///
/// Implementations must make `journal_accept` and `save_progress` atomic
/// per record and must not reorder them past `sync`.
pub trait Journal {
    /// Loads the progress record. Called at startup only.
    fn load_progress(&mut self, node: NodeId) -> Result<Progress, JournalError>;

    /// Durably upserts the accept at its slot.
    fn journal_accept(&mut self, accept: &Accept) -> Result<(), JournalError>;

    /// Loads the accept at `slot`, if any.
    fn load_accept(&mut self, slot: Slot) -> Result<Option<Accept>, JournalError>;

    /// Durably overwrites the progress record.
    fn save_progress(&mut self, progress: &Progress) -> Result<(), JournalError>;

    /// Blocks until all prior writes are on stable storage.
    fn sync(&mut self) -> Result<(), JournalError>;
}

// ============================================================================
// MemoryJournal
// ============================================================================

/// An in-memory journal for tests and simulations.
///
/// Tracks how often `sync` was called and how many writes are still
/// unsynced, which is what the sync-before-release contract tests
/// observe. "Durability" here is just process memory; clone the journal
/// to model a surviving disk across a simulated crash.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    accepts: BTreeMap<Slot, Accept>,
    progress: Option<Progress>,
    syncs: u64,
    unsynced_writes: u64,
}

impl MemoryJournal {
    /// Creates an empty journal holding no progress record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal pre-initialized with the initial progress of
    /// `node`, ready for [`PaxosNode::new`](crate::PaxosNode::new).
    pub fn initialized(node: NodeId) -> Self {
        Self {
            progress: Some(Progress::initial(node)),
            ..Self::default()
        }
    }

    /// Returns how many times `sync` has been called.
    pub fn sync_count(&self) -> u64 {
        self.syncs
    }

    /// Returns how many writes have not yet been covered by a `sync`.
    pub fn unsynced_writes(&self) -> u64 {
        self.unsynced_writes
    }

    /// Returns the stored progress record, if any, without the startup
    /// error handling of [`Journal::load_progress`].
    pub fn progress(&self) -> Option<Progress> {
        self.progress
    }

    /// Returns the number of journalled accepts.
    pub fn accept_count(&self) -> usize {
        self.accepts.len()
    }
}

impl Journal for MemoryJournal {
    fn load_progress(&mut self, node: NodeId) -> Result<Progress, JournalError> {
        self.progress
            .filter(|p| p.node_id() == node)
            .ok_or(JournalError::MissingProgress { node })
    }

    fn journal_accept(&mut self, accept: &Accept) -> Result<(), JournalError> {
        self.accepts.insert(accept.slot, accept.clone());
        self.unsynced_writes += 1;
        Ok(())
    }

    fn load_accept(&mut self, slot: Slot) -> Result<Option<Accept>, JournalError> {
        Ok(self.accepts.get(&slot).cloned())
    }

    fn save_progress(&mut self, progress: &Progress) -> Result<(), JournalError> {
        self.progress = Some(*progress);
        self.unsynced_writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), JournalError> {
        self.syncs += 1;
        self.unsynced_writes = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pyrope_types::{BallotNumber, Command};

    fn accept_at(slot: u64) -> Accept {
        Accept::new(
            NodeId::new(1),
            Slot::new(slot),
            BallotNumber::new(1, NodeId::new(1)),
            Command::NoOp,
        )
    }

    #[test]
    fn load_progress_requires_initialization() {
        let mut journal = MemoryJournal::new();
        assert!(matches!(
            journal.load_progress(NodeId::new(1)),
            Err(JournalError::MissingProgress { .. })
        ));

        let mut journal = MemoryJournal::initialized(NodeId::new(1));
        let progress = journal.load_progress(NodeId::new(1)).expect("initialized");
        assert_eq!(progress, Progress::initial(NodeId::new(1)));
    }

    #[test]
    fn journal_accept_is_an_upsert() {
        let mut journal = MemoryJournal::initialized(NodeId::new(1));
        journal.journal_accept(&accept_at(3)).expect("journal");
        journal.journal_accept(&accept_at(3)).expect("re-journal");
        assert_eq!(journal.accept_count(), 1);
        assert_eq!(
            journal.load_accept(Slot::new(3)).expect("load"),
            Some(accept_at(3))
        );
        assert_eq!(journal.load_accept(Slot::new(4)).expect("load"), None);
    }

    #[test]
    fn sync_covers_pending_writes() {
        let mut journal = MemoryJournal::initialized(NodeId::new(1));
        journal.journal_accept(&accept_at(1)).expect("journal");
        journal
            .save_progress(&Progress::initial(NodeId::new(1)))
            .expect("save");
        assert_eq!(journal.unsynced_writes(), 2);

        journal.sync().expect("sync");
        assert_eq!(journal.unsynced_writes(), 0);
        assert_eq!(journal.sync_count(), 1);
    }
}
