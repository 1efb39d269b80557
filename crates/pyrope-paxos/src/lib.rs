//! # pyrope-paxos: Multi-Paxos replication engine
//!
//! A deterministic, single-node state machine that drives the Paxos
//! protocol for a totally ordered log of commands, plus the engine that
//! wraps it.
//!
//! # Architecture
//!
//! The core follows a strict decision-function discipline:
//! - [`PaxosNode`] takes one protocol message and produces outgoing
//!   messages plus newly fixed commands ([`PaxosOutput`])
//! - Durability goes through the [`Journal`] trait; nothing else does I/O
//! - [`PaxosEngine`] owns mutual exclusion, orders `sync()` before any
//!   message is released, and drives the timeout/heartbeat surface
//!   through a host-provided [`TimerDriver`]
//!
//! This makes the protocol itself pure enough to exercise exhaustively in
//! tests: feed messages, observe messages and fixed slots.
//!
//! # Key Types
//!
//! - [`PaxosNode`]: the decision function over inbound messages
//! - [`PaxosEngine`]: the host-facing wrapper
//! - [`Message`]: the sum type of all protocol messages
//! - [`Journal`]: the crash-durability contract
//! - [`QuorumAssessor`]: pluggable vote-set assessment

mod codec;
mod engine;
mod journal;
mod message;
mod node;
mod quorum;
mod types;


pub use codec::{decode_message, decode_progress, encode_message, encode_progress, CodecError};
pub use engine::{PaxosEngine, TimerDriver};
pub use journal::{Journal, JournalError, MemoryJournal};
pub use message::{
    Accept, AcceptResponse, Catchup, CatchupResponse, Fixed, Message, Prepare, PrepareResponse,
    Vote,
};
pub use node::{PaxosError, PaxosNode, PaxosOutput};
pub use quorum::{Outcome, QuorumAssessor, SimpleMajority};
pub use types::{Progress, Role};

pub use pyrope_types::{BallotNumber, Command, NodeId, Slot};
