//! Protocol state types.
//!
//! This module defines the durable progress record and the role a node
//! plays at any moment. Both are owned exclusively by the
//! [`PaxosNode`](crate::PaxosNode); nothing else mutates them.

use std::fmt::{self, Display};

use pyrope_types::{BallotNumber, NodeId, Slot};

// ============================================================================
// Role
// ============================================================================

/// The role a node plays in the protocol.
///
/// Role is volatile: a node that restarts always comes back as
/// [`Role::Follow`] and re-earns leadership through a timeout and a
/// prepare round.
///
/// # Invariants
///
/// - `Follow`: no term, no prepare tallies, no accept tallies
/// - `Recover`: has a term; holds prepare tallies and/or accept tallies
/// - `Lead`: has a term; no prepare tallies; may hold accept tallies for
///   in-flight proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Passive: votes on prepares and accepts, applies fixed commands.
    Follow,

    /// Probing the log under a fresh ballot after a timeout.
    Recover,

    /// Proposing new commands; the only role that accepts client work.
    Lead,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follow => f.write_str("follow"),
            Role::Recover => f.write_str("recover"),
            Role::Lead => f.write_str("lead"),
        }
    }
}

// ============================================================================
// Progress
// ============================================================================

/// The durable progress triple of one node.
///
/// Progress is created when the journal is initialized, mutated only
/// inside the core, and never destroyed. It is the entirety of what a
/// node must remember across a crash:
///
/// - `highest_promised` — the promise; monotone non-decreasing across the
///   node's whole lifetime, crashes included
/// - `highest_accepted` — the highest slot with a journalled accept
/// - `highest_fixed` — the highest slot known fixed; everything at or
///   below it is immutable in the journal
///
/// # Invariants
///
/// `highest_fixed <= highest_accepted` at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    node_id: NodeId,
    highest_promised: BallotNumber,
    highest_accepted: Slot,
    highest_fixed: Slot,
}

impl Progress {
    /// Creates the initial progress record for a fresh journal: null
    /// promise, nothing accepted, nothing fixed.
    pub fn initial(node_id: NodeId) -> Self {
        Self {
            node_id,
            highest_promised: BallotNumber::ZERO,
            highest_accepted: Slot::ZERO,
            highest_fixed: Slot::ZERO,
        }
    }

    /// Reconstructs a progress record from its durable parts.
    pub fn new(
        node_id: NodeId,
        highest_promised: BallotNumber,
        highest_accepted: Slot,
        highest_fixed: Slot,
    ) -> Self {
        let progress = Self {
            node_id,
            highest_promised,
            highest_accepted,
            highest_fixed,
        };
        progress.check_invariants();
        progress
    }

    /// Returns the owning node.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the highest promised ballot.
    pub fn highest_promised(&self) -> BallotNumber {
        self.highest_promised
    }

    /// Returns the highest slot with a journalled accept.
    pub fn highest_accepted(&self) -> Slot {
        self.highest_accepted
    }

    /// Returns the highest fixed slot.
    pub fn highest_fixed(&self) -> Slot {
        self.highest_fixed
    }

    /// Raises the promise to `ballot`.
    ///
    /// # Panics
    ///
    /// Panics if the promise would move backwards — that would break the
    /// lifetime monotonicity the whole protocol rests on.
    pub(crate) fn promise(&mut self, ballot: BallotNumber) {
        assert!(
            self.highest_promised <= ballot,
            "promise must be monotone: current={}, new={}",
            self.highest_promised,
            ballot
        );
        self.highest_promised = ballot;
    }

    /// Records that `slot` now holds a journalled accept.
    pub(crate) fn accepted_up_to(&mut self, slot: Slot) {
        debug_assert!(
            slot >= self.highest_accepted,
            "accepted slot must not regress: current={}, new={}",
            self.highest_accepted,
            slot
        );
        self.highest_accepted = slot;
    }

    /// Records that `slot` is now fixed.
    pub(crate) fn fixed_up_to(&mut self, slot: Slot) {
        debug_assert!(
            slot > self.highest_fixed,
            "fixed slot must advance: current={}, new={}",
            self.highest_fixed,
            slot
        );
        self.highest_fixed = slot;
        // A slot can only be fixed once accepted somewhere; catching up
        // through the journal can fix slots this node never saw proposed.
        if self.highest_accepted < slot {
            self.highest_accepted = slot;
        }
        self.check_invariants();
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.highest_fixed <= self.highest_accepted,
            "fixed={} must not exceed accepted={}",
            self.highest_fixed,
            self.highest_accepted
        );
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node={} promised={} accepted={} fixed={}",
            self.node_id, self.highest_promised, self.highest_accepted, self.highest_fixed
        )
    }
}
