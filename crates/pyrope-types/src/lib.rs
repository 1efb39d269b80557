//! # pyrope-types: Core types for `Pyrope`
//!
//! This crate contains the shared vocabulary of the `Pyrope` replication
//! engine:
//! - Cluster identifiers ([`NodeId`])
//! - Log positions ([`Slot`])
//! - Proposal identifiers ([`BallotNumber`])
//! - Replicated commands ([`Command`])
//!
//! Everything here is small, cheap to copy or clone, and totally ordered
//! where the protocol needs an order.

use std::fmt::{self, Display};

use bytes::Bytes;

// ============================================================================
// NodeId - Copy (1-byte value)
// ============================================================================

/// Unique identifier for a node in the cluster.
///
/// Node identifiers must be unique across the cluster and across enough
/// time for prior messages to have been forgotten. They also serve as the
/// ballot tiebreak, which is what keeps ballots from distinct nodes
/// disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(u8);

impl NodeId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the identifier as a raw `u8` for encoding.
    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for NodeId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

// ============================================================================
// Slot - Copy (8-byte value)
// ============================================================================

/// Position in the replicated log.
///
/// Slots are assigned sequentially and each slot eventually holds exactly
/// one fixed command cluster-wide. Slot 0 is reserved; the first usable
/// slot is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Slot(u64);

impl Slot {
    /// The reserved zeroth slot. Nothing is ever proposed here.
    pub const ZERO: Slot = Slot(0);

    pub const fn new(slot: u64) -> Self {
        Self(slot)
    }

    /// Returns the slot as a `u64` for encoding and arithmetic.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next slot.
    pub fn next(self) -> Slot {
        Slot(self.0 + 1)
    }

    /// Returns true if this is the reserved zeroth slot.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Slot {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Slot> for u64 {
    fn from(slot: Slot) -> Self {
        slot.0
    }
}

// ============================================================================
// BallotNumber - Copy (5-byte value, totally ordered)
// ============================================================================

/// Totally ordered proposal identifier with a node-id tiebreak.
///
/// The order is lexicographic on `(counter, node_id)`, so two ballots are
/// equal only when both the counter and the node agree. A node fabricates
/// a fresh ballot by incrementing the counter of its highest promise and
/// appending its own node id, which makes ballots from distinct nodes
/// disjoint — a Paxos requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BallotNumber {
    counter: u32,
    node_id: NodeId,
}

impl BallotNumber {
    /// The null ballot, below every ballot any node can mint.
    pub const ZERO: BallotNumber = BallotNumber {
        counter: 0,
        node_id: NodeId::new(0),
    };

    pub const fn new(counter: u32, node_id: NodeId) -> Self {
        Self { counter, node_id }
    }

    /// Returns the round counter.
    pub fn counter(self) -> u32 {
        self.counter
    }

    /// Returns the node that minted this ballot.
    pub fn node_id(self) -> NodeId {
        self.node_id
    }
}

impl Display for BallotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.counter, self.node_id)
    }
}

// ============================================================================
// Command - the replicated value
// ============================================================================

/// A command carried through consensus into the replicated log.
///
/// `NoOp` is the sentinel a recovering leader uses to fill uncontested
/// slots so the log stays contiguous; hosts skip it when applying fixed
/// commands. `App` carries an opaque client message identifier (the
/// application's deduplication handle) and an opaque payload — the engine
/// never interprets either.
///
/// Equality is structural, which is what the at-most-one-command-per-slot
/// invariant is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Placeholder used during recovery; advances the log without
    /// reaching the application.
    NoOp,

    /// An application command.
    App {
        /// Opaque client message identifier.
        uuid: Bytes,
        /// Opaque operation payload.
        payload: Bytes,
    },
}

impl Command {
    /// Creates an application command from raw parts.
    pub fn app(uuid: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Command::App {
            uuid: uuid.into(),
            payload: payload.into(),
        }
    }

    /// Returns true if this is the recovery sentinel.
    pub fn is_noop(&self) -> bool {
        matches!(self, Command::NoOp)
    }
}
