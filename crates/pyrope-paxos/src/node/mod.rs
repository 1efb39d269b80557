//! The Paxos decision function.
//!
//! [`PaxosNode`] is the deterministic core: it takes one protocol message
//! and produces outgoing messages plus newly fixed commands, mutating its
//! durable [`Progress`] through the [`Journal`] as a side effect. It is
//! completely synchronous — the only suspension points are journal
//! calls — and holds no I/O of its own, which is what lets the protocol
//! be driven message-by-message in tests.
//!
//! # Module layout
//!
//! - `voting` — Prepare/Accept handlers (every role votes)
//! - `recovery` — PrepareResponse tallying and probe extension
//! - `leading` — AcceptResponse tallying, the contiguous commit scan,
//!   and new proposals
//! - `catchup` — Fixed announcements and targeted catch-up
//!
//! # Self-delivery
//!
//! A node votes for its own proposals. Where the protocol calls for it
//! (own Prepare, own Accept, the proposal issued on a prepare win, and
//! timeout), handlers re-enter [`PaxosNode::paxos`] with the node's own
//! response and merge the nested output into their own. The protocol
//! bounds the recursion: prepare → self-response → accept →
//! self-response, at most two nested dispatches per outer message.

mod catchup;
mod leading;
mod recovery;
mod voting;

use std::collections::{btree_map, BTreeMap, HashMap};

use thiserror::Error;

use pyrope_types::{BallotNumber, Command, NodeId, Slot};

use crate::journal::{Journal, JournalError};
use crate::message::{
    Accept, AcceptResponse, Fixed, Message, Prepare, PrepareResponse, Vote,
};
use crate::quorum::QuorumAssessor;
use crate::types::{Progress, Role};

// ============================================================================
// Paxos Output
// ============================================================================

/// The result of running the decision function.
///
/// The caller (the engine, and transitively the host) is responsible for
/// syncing the journal, transmitting `messages`, and applying `fixed` in
/// slot order. `fixed` includes `NoOp` entries — `highest_fixed` advances
/// through them and hosts skip them on apply.
#[derive(Debug, Default)]
pub struct PaxosOutput {
    /// Messages to transmit, in the order they were produced.
    pub messages: Vec<Message>,

    /// Commands fixed by this run, keyed by slot.
    pub fixed: BTreeMap<Slot, Command>,
}

impl PaxosOutput {
    /// Creates an empty output (no messages, nothing fixed).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an output carrying a single message.
    pub fn with_message(message: impl Into<Message>) -> Self {
        Self {
            messages: vec![message.into()],
            fixed: BTreeMap::new(),
        }
    }

    /// Returns true if there are no messages and nothing was fixed.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.fixed.is_empty()
    }

    /// Merges another output into this one.
    ///
    /// # Panics
    ///
    /// Panics if the two outputs fix *different* commands at the same
    /// slot. Paxos fixes at most one command per slot; seeing two here
    /// means the node has diverged, and crashing beats replicating the
    /// divergence.
    pub fn merge(&mut self, other: PaxosOutput) {
        self.messages.extend(other.messages);
        for (slot, command) in other.fixed {
            match self.fixed.entry(slot) {
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(command);
                }
                btree_map::Entry::Occupied(entry) => {
                    assert!(
                        *entry.get() == command,
                        "conflicting commands fixed at slot {}: {:?} vs {:?}",
                        slot,
                        entry.get(),
                        command
                    );
                }
            }
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors the decision function can surface to the host.
///
/// Journal failures are the only recoverable-by-the-host kind; protocol
/// states that cannot arise under the invariants are fatal assertions
/// instead, because continuing past one risks divergence.
#[derive(Debug, Error)]
pub enum PaxosError {
    /// The journal failed; the node must not emit further messages until
    /// the host has dealt with its storage.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

// ============================================================================
// Accept Votes
// ============================================================================

/// Per-slot bookkeeping for an in-flight proposal of this node.
#[derive(Debug, Clone)]
pub(crate) struct AcceptVotes {
    /// The accept this node issued for the slot.
    pub(crate) accept: Accept,

    /// Responses gathered so far, by voter.
    pub(crate) responses: HashMap<NodeId, AcceptResponse>,

    /// Set once a quorum accepted; the entry then waits for the
    /// contiguous commit scan to consume it.
    pub(crate) chosen: bool,
}

impl AcceptVotes {
    pub(crate) fn new(accept: Accept) -> Self {
        Self {
            accept,
            responses: HashMap::new(),
            chosen: false,
        }
    }

    pub(crate) fn votes(&self) -> Vec<Vote> {
        self.responses.values().map(|r| r.vote).collect()
    }
}

// ============================================================================
// Paxos Node
// ============================================================================

/// A single node in a Paxos cluster, running the part-time parliament
/// algorithm over a [`Journal`] and a [`QuorumAssessor`].
///
/// The node owns all mutable protocol state: the durable progress triple,
/// the volatile role/term, and the vote tallies. One engine owns one
/// node; there is no shared state anywhere else.
///
/// The journal **must** be flushed to durable storage before any message
/// returned from [`PaxosNode::paxos`] is transmitted. The engine enforces
/// that ordering; drive the node directly only in tests.
pub struct PaxosNode<J, Q> {
    /// This node's cluster-unique identifier.
    node_id: NodeId,

    /// Durable storage for accepts and progress.
    journal: J,

    /// Vote-set assessment strategy.
    assessor: Q,

    /// The durable progress triple, loaded from the journal at startup.
    progress: Progress,

    /// Current role. A freshly started node always follows.
    role: Role,

    /// The ballot this node currently proposes under; `None` iff Follow.
    term: Option<BallotNumber>,

    /// Prepare responses by probed slot, tracked while recovering.
    pub(crate) prepare_tallies: BTreeMap<Slot, HashMap<NodeId, PrepareResponse>>,

    /// Accept votes by slot for proposals this node issued.
    pub(crate) accept_tallies: BTreeMap<Slot, AcceptVotes>,
}

impl<J: Journal, Q: QuorumAssessor> PaxosNode<J, Q> {
    /// Creates a node over a pre-initialized journal, loading its durable
    /// progress. The node starts as a follower; volatile tallies do not
    /// survive restarts.
    pub fn new(node_id: NodeId, assessor: Q, mut journal: J) -> Result<Self, JournalError> {
        let progress = journal.load_progress(node_id)?;
        Ok(Self {
            node_id,
            journal,
            assessor,
            progress,
            role: Role::Follow,
            term: None,
            prepare_tallies: BTreeMap::new(),
            accept_tallies: BTreeMap::new(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns this node's identifier.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the ballot this node proposes under, if any.
    pub fn term(&self) -> Option<BallotNumber> {
        self.term
    }

    /// Returns a copy of the durable progress triple.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Returns the highest fixed slot.
    pub fn highest_fixed(&self) -> Slot {
        self.progress.highest_fixed()
    }

    /// Returns the highest slot with a journalled accept.
    pub fn highest_accepted(&self) -> Slot {
        self.progress.highest_accepted()
    }

    /// Returns true if this node currently leads.
    pub fn is_leader(&self) -> bool {
        self.role == Role::Lead
    }

    /// Returns true if this node is recovering.
    pub fn is_recovering(&self) -> bool {
        self.role == Role::Recover
    }

    /// Returns the journal, for hosts that inspect it after fixing.
    pub fn journal(&self) -> &J {
        &self.journal
    }

    pub(crate) fn sync_journal(&mut self) -> Result<(), JournalError> {
        self.journal.sync()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Runs the decision function on one message.
    ///
    /// Every message kind is handled exactly once; the match is
    /// exhaustive by construction. The returned messages must not be
    /// transmitted before the journal is synced.
    pub fn paxos(&mut self, message: &Message) -> Result<PaxosOutput, PaxosError> {
        match message {
            Message::Prepare(m) => self.on_prepare(m),
            Message::PrepareResponse(m) => self.on_prepare_response(m),
            Message::Accept(m) => self.on_accept(m),
            Message::AcceptResponse(m) => self.on_accept_response(m),
            Message::Fixed(m) => self.on_fixed(m),
            Message::Catchup(m) => self.on_catchup(m),
            Message::CatchupResponse(m) => self.on_catchup_response(m),
        }
    }

    // ========================================================================
    // Role Transitions
    // ========================================================================

    /// Gives up leadership or recovery: back to follower, tallies and
    /// term cleared. Progress is untouched — backdown changes nothing
    /// durable, so there is nothing to save.
    pub(crate) fn backdown(&mut self) {
        if self.role != Role::Follow {
            tracing::info!(
                node = %self.node_id,
                role = %self.role,
                "backing down to follower"
            );
        }
        self.role = Role::Follow;
        self.term = None;
        self.prepare_tallies.clear();
        self.accept_tallies.clear();
    }

    pub(crate) fn ascend(&mut self, role: Role) {
        debug_assert!(
            self.term.is_some(),
            "cannot hold role {role} without a term"
        );
        self.role = role;
    }

    // ========================================================================
    // Timeout & Heartbeat
    // ========================================================================

    /// Handles a timeout: a follower starts recovering under a fresh
    /// term and probes the first unfixed slot; any other role ignores
    /// the event (its own heartbeat keeps it live).
    ///
    /// The returned output leads with the Prepare to broadcast, followed
    /// by whatever the self-delivered prepare produced.
    pub fn timeout(&mut self) -> Result<PaxosOutput, PaxosError> {
        if self.role != Role::Follow {
            return Ok(PaxosOutput::empty());
        }

        let term = BallotNumber::new(
            self.progress.highest_promised().counter() + 1,
            self.node_id,
        );
        self.term = Some(term);
        self.ascend(Role::Recover);
        tracing::info!(node = %self.node_id, term = %term, "timeout: recovering");

        let prepare = Prepare::new(self.node_id, self.progress.highest_fixed().next(), term);
        let mut output = PaxosOutput::with_message(prepare);
        output.merge(self.paxos(&Message::Prepare(prepare))?);
        Ok(output)
    }

    /// Produces the messages a periodic heartbeat re-transmits to keep
    /// followers from timing out and to repair message loss.
    ///
    /// A leader announces its fixed watermark and re-emits the accepts
    /// still in flight; a recoverer re-emits its outstanding prepares; a
    /// follower stays silent.
    pub fn heartbeat(&mut self) -> Result<Vec<Message>, PaxosError> {
        let mut messages = Vec::new();
        match self.role {
            Role::Lead => {
                messages.push(Message::Fixed(self.current_fixed_message()?));
                let mut slot = self.progress.highest_fixed().next();
                while slot <= self.progress.highest_accepted() {
                    match self.journal.load_accept(slot)? {
                        Some(accept) => messages.push(Message::Accept(accept)),
                        None => break,
                    }
                    slot = slot.next();
                }
            }
            Role::Recover => {
                let term = self.term.expect("recovering node always has a term");
                for &slot in self.prepare_tallies.keys() {
                    messages.push(Message::Prepare(Prepare::new(self.node_id, slot, term)));
                }
            }
            Role::Follow => {}
        }
        Ok(messages)
    }

    /// Builds the Fixed announcement for the current watermark: the
    /// highest fixed slot and the ballot of the accept journalled there.
    pub(crate) fn current_fixed_message(&mut self) -> Result<Fixed, PaxosError> {
        let fixed_slot = self.progress.highest_fixed();
        let fixed_ballot = self
            .journal
            .load_accept(fixed_slot)?
            .map(|accept| accept.ballot)
            .unwrap_or(BallotNumber::ZERO);
        Ok(Fixed {
            from: self.node_id,
            fixed_slot,
            fixed_ballot,
        })
    }

    // ========================================================================
    // Response Builders
    // ========================================================================

    /// Builds a prepare response, handing over this node's journalled
    /// accept at the probed slot and its progress watermarks for
    /// catch-up and abdication decisions.
    pub(crate) fn prepare_response(
        &mut self,
        prepare: &Prepare,
        yes: bool,
    ) -> Result<PrepareResponse, PaxosError> {
        Ok(PrepareResponse {
            from: self.node_id,
            to: prepare.ballot.node_id(),
            vote: Vote {
                voter: self.node_id,
                voted_for: prepare.ballot.node_id(),
                slot: prepare.slot,
                yes,
                ballot: prepare.ballot,
            },
            voter_highest_fixed: self.progress.highest_fixed(),
            voter_highest_accepted: self.progress.highest_accepted(),
            journalled_accept: self.journal.load_accept(prepare.slot)?,
        })
    }

    /// Builds an accept response addressed to the proposer.
    pub(crate) fn accept_response(&self, accept: &Accept, yes: bool) -> AcceptResponse {
        AcceptResponse {
            from: self.node_id,
            to: accept.ballot.node_id(),
            vote: Vote {
                voter: self.node_id,
                voted_for: accept.ballot.node_id(),
                slot: accept.slot,
                yes,
                ballot: accept.ballot,
            },
            voter_highest_fixed: self.progress.highest_fixed(),
        }
    }
}
