//! Paxos protocol messages.
//!
//! This module defines all messages used in the protocol:
//!
//! ## Consensus
//! - [`Prepare`] - Recoverer → All: promise me this slot under this ballot
//! - [`PrepareResponse`] - Voter → Recoverer: my vote, plus what I have journalled
//! - [`Accept`] - Proposer → All: journal this command at this slot
//! - [`AcceptResponse`] - Voter → Proposer: my vote
//!
//! ## Fixing & Repair
//! - [`Fixed`] - Leader → All: everything up to this slot is fixed
//! - [`Catchup`] - Replica → Leader: I am missing these slots
//! - [`CatchupResponse`] - Leader → Replica: here are the fixed accepts
//!
//! Every message carries `from`; direct messages also carry `to`. The
//! whole taxonomy is closed under [`Message`], and every handler matches
//! exhaustively so a new message kind cannot be silently dropped.

use pyrope_types::{BallotNumber, Command, NodeId, Slot};

// ============================================================================
// Vote
// ============================================================================

/// One node's vote on a prepare or accept round.
///
/// `voted_for` is the node whose proposal is being judged; responses are
/// only tallied by the node they are addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    /// The node casting the vote.
    pub voter: NodeId,

    /// The proposer the vote is addressed to.
    pub voted_for: NodeId,

    /// The slot the vote is about.
    pub slot: Slot,

    /// Yes or no.
    pub yes: bool,

    /// The ballot the vote was cast under.
    pub ballot: BallotNumber,
}

// ============================================================================
// Message Payloads
// ============================================================================

/// Phase-1 probe for one slot under a fresh ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prepare {
    /// The recovering node.
    pub from: NodeId,

    /// The slot being probed.
    pub slot: Slot,

    /// The recoverer's term.
    pub ballot: BallotNumber,
}

impl Prepare {
    pub fn new(from: NodeId, slot: Slot, ballot: BallotNumber) -> Self {
        Self { from, slot, ballot }
    }
}

/// Response to a [`Prepare`].
///
/// A positive vote is a promise to reject anything of lower ballot. The
/// response also reports how far the voter has progressed —
/// `voter_highest_fixed` lets a stale recoverer abdicate,
/// `voter_highest_accepted` lets the recoverer learn of further slots it
/// must probe — and hands over the accept journalled at the probed slot,
/// which is what the recoverer's "highest-numbered accept wins" choice is
/// computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareResponse {
    pub from: NodeId,
    pub to: NodeId,

    /// The vote on the probed slot.
    pub vote: Vote,

    /// The voter's highest fixed slot.
    pub voter_highest_fixed: Slot,

    /// The voter's highest accepted slot.
    pub voter_highest_accepted: Slot,

    /// The accept journalled at the probed slot, if any.
    pub journalled_accept: Option<Accept>,
}

/// Phase-2 request: journal this command at this slot.
///
/// Doubles as the per-slot journal record — accepts are the only thing a
/// journal stores besides the progress triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accept {
    /// The proposing node.
    pub from: NodeId,

    /// The slot the command is proposed at.
    pub slot: Slot,

    /// The proposer's term.
    pub ballot: BallotNumber,

    /// The proposed command.
    pub command: Command,
}

impl Accept {
    pub fn new(from: NodeId, slot: Slot, ballot: BallotNumber, command: Command) -> Self {
        Self {
            from,
            slot,
            ballot,
            command,
        }
    }

    /// Rank used by "pick highest accepted": `(ballot, slot)` ascending.
    pub fn rank(&self) -> (BallotNumber, Slot) {
        (self.ballot, self.slot)
    }
}

/// Response to an [`Accept`].
///
/// Carries the voter's highest fixed slot so a leader that has fallen
/// behind the cluster learns to abdicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptResponse {
    pub from: NodeId,
    pub to: NodeId,

    /// The vote on the proposed slot.
    pub vote: Vote,

    /// The voter's highest fixed slot.
    pub voter_highest_fixed: Slot,
}

/// Announcement that every slot up to `fixed_slot` is fixed.
///
/// Carries the ballot of the accept at the boundary slot so a receiver
/// can check that its journalled accept there is the chosen one before
/// fixing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixed {
    pub from: NodeId,

    /// The sender's highest fixed slot.
    pub fixed_slot: Slot,

    /// The ballot of the accept journalled at `fixed_slot`.
    pub fixed_ballot: BallotNumber,
}

/// Targeted request for the accepts a node is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catchup {
    pub from: NodeId,
    pub to: NodeId,

    /// The slots the sender could not materialize from its journal.
    pub slots: Vec<Slot>,
}

/// Reply to a [`Catchup`]: the journalled accepts for every requested
/// slot the responder has fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchupResponse {
    pub from: NodeId,
    pub to: NodeId,

    /// Fixed accepts, in the order they were requested.
    pub accepts: Vec<Accept>,
}

// ============================================================================
// Message
// ============================================================================

/// The sum of all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Prepare(Prepare),
    PrepareResponse(PrepareResponse),
    Accept(Accept),
    AcceptResponse(AcceptResponse),
    Fixed(Fixed),
    Catchup(Catchup),
    CatchupResponse(CatchupResponse),
}

impl Message {
    /// Returns the sending node.
    pub fn from(&self) -> NodeId {
        match self {
            Message::Prepare(m) => m.from,
            Message::PrepareResponse(m) => m.from,
            Message::Accept(m) => m.from,
            Message::AcceptResponse(m) => m.from,
            Message::Fixed(m) => m.from,
            Message::Catchup(m) => m.from,
            Message::CatchupResponse(m) => m.from,
        }
    }

    /// Returns the intended recipient, or `None` for broadcasts.
    pub fn to(&self) -> Option<NodeId> {
        match self {
            Message::Prepare(_) | Message::Accept(_) | Message::Fixed(_) => None,
            Message::PrepareResponse(m) => Some(m.to),
            Message::AcceptResponse(m) => Some(m.to),
            Message::Catchup(m) => Some(m.to),
            Message::CatchupResponse(m) => Some(m.to),
        }
    }

    /// Returns the message kind for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Prepare(_) => "Prepare",
            Message::PrepareResponse(_) => "PrepareResponse",
            Message::Accept(_) => "Accept",
            Message::AcceptResponse(_) => "AcceptResponse",
            Message::Fixed(_) => "Fixed",
            Message::Catchup(_) => "Catchup",
            Message::CatchupResponse(_) => "CatchupResponse",
        }
    }
}

impl From<Prepare> for Message {
    fn from(m: Prepare) -> Self {
        Message::Prepare(m)
    }
}

impl From<Accept> for Message {
    fn from(m: Accept) -> Self {
        Message::Accept(m)
    }
}

impl From<Fixed> for Message {
    fn from(m: Fixed) -> Self {
        Message::Fixed(m)
    }
}
