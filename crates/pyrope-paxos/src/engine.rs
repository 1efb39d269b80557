//! The engine: mutual exclusion, durability ordering, and timers.
//!
//! [`PaxosEngine`] wraps one [`PaxosNode`] and enforces the two contracts
//! the core cannot enforce for itself:
//!
//! 1. **Single writer.** Any number of host threads may call in; a
//!    single-permit mutex admits one dispatch at a time.
//! 2. **Sync before send.** The journal is synced after every batch and
//!    before the results are returned, so nothing leaves this process
//!    that stable storage does not already back.
//!
//! The engine also owns the timeout surface. It never schedules anything
//! itself — the host supplies a [`TimerDriver`] and the engine tells it
//! when the random leader-failure timeout and the heartbeat must be
//! (re)armed.

use std::sync::Mutex;

use pyrope_types::Command;

use crate::journal::Journal;
use crate::message::Message;
use crate::node::{PaxosError, PaxosNode, PaxosOutput};
use crate::quorum::QuorumAssessor;
use crate::types::{Progress, Role};

// ============================================================================
// TimerDriver
// ============================================================================

/// Host-supplied timer hooks.
///
/// The engine declares *when* timers must be armed; the host decides how.
/// `set_random_timeout` should schedule a [`PaxosEngine::timeout`] call
/// after a randomized delay (randomization is what breaks prepare duels),
/// cancelling any timeout already pending. `set_heartbeat` should
/// schedule a [`PaxosEngine::heartbeat`] call after a fixed period
/// shorter than the minimum random timeout.
pub trait TimerDriver {
    /// Schedules (or reschedules) the leader-failure timeout.
    fn set_random_timeout(&mut self);

    /// Cancels any pending leader-failure timeout.
    fn clear_timeout(&mut self);

    /// Schedules the next heartbeat.
    fn set_heartbeat(&mut self);
}

// ============================================================================
// PaxosEngine
// ============================================================================

struct Inner<J, Q, T> {
    node: PaxosNode<J, Q>,
    timers: T,
}

/// Thread-safe wrapper around a single [`PaxosNode`].
///
/// One engine owns one node; multi-tenanted deployments instantiate
/// multiple independent engines.
pub struct PaxosEngine<J, Q, T> {
    inner: Mutex<Inner<J, Q, T>>,

    /// When false, the host owns the durability barrier (it commits the
    /// journal inside its own transaction together with the applied
    /// commands) and the engine skips `sync()`.
    sync_journal: bool,
}

impl<J: Journal, Q: QuorumAssessor, T: TimerDriver> PaxosEngine<J, Q, T> {
    /// Creates an engine that syncs the journal after every batch.
    pub fn new(node: PaxosNode<J, Q>, timers: T) -> Self {
        Self {
            inner: Mutex::new(Inner { node, timers }),
            sync_journal: true,
        }
    }

    /// Creates an engine whose host manages the durability barrier
    /// itself. The host **must** make the journal durable before
    /// transmitting any returned message; skipping that breaks the
    /// algorithm just as surely as skipping `fsync` would.
    pub fn host_managed_sync(node: PaxosNode<J, Q>, timers: T) -> Self {
        Self {
            inner: Mutex::new(Inner { node, timers }),
            sync_journal: false,
        }
    }

    /// Arms the initial random timeout. Call once at startup.
    pub fn start(&self) {
        self.lock().timers.set_random_timeout();
    }

    /// Runs a batch of inbound messages through the node.
    ///
    /// Messages this node itself originated are ignored — a broadcast
    /// transport delivers everything everywhere, including back to the
    /// sender. The journal is synced before the merged result is
    /// returned; transmit only after this method returns.
    pub fn paxos(&self, batch: &[Message]) -> Result<PaxosOutput, PaxosError> {
        let mut inner = self.lock();
        let mut merged = PaxosOutput::empty();

        for message in batch {
            if message.from() == inner.node.node_id() {
                continue;
            }
            merged.merge(inner.dispatch(message)?);
        }

        if self.sync_journal {
            inner.node.sync_journal()?;
        }
        Ok(merged)
    }

    /// Proposes a batch of application commands.
    ///
    /// Only a leader produces anything: one Accept per command (to
    /// broadcast) followed by a Fixed watermark announcement, plus
    /// whatever the self-votes fixed synchronously — a single-node
    /// cluster fixes each proposal within this call. On a non-leader
    /// this returns an empty output and changes nothing.
    pub fn command(&self, commands: Vec<Command>) -> Result<PaxosOutput, PaxosError> {
        let mut inner = self.lock();
        let mut output = PaxosOutput::empty();

        if !inner.node.is_leader() {
            return Ok(output);
        }

        for command in commands {
            let accept = inner.node.next_accept(command);
            output.messages.push(Message::Accept(accept.clone()));
            output.merge(inner.node.paxos(&Message::Accept(accept))?);
        }
        let fixed = inner.node.current_fixed_message()?;
        output.messages.push(Message::Fixed(fixed));

        if self.sync_journal {
            inner.node.sync_journal()?;
        }
        Ok(output)
    }

    /// Fires the leader-failure timeout.
    ///
    /// A follower starts recovering and the output leads with the
    /// Prepare to broadcast; any other role returns an empty output.
    pub fn timeout(&self) -> Result<PaxosOutput, PaxosError> {
        let mut inner = self.lock();
        let output = inner.node.timeout()?;

        if !output.is_empty() {
            inner.timers.set_random_timeout();
        }
        if matches!(inner.node.role(), Role::Lead | Role::Recover) {
            inner.timers.set_heartbeat();
        }

        if self.sync_journal {
            inner.node.sync_journal()?;
        }
        Ok(output)
    }

    /// Fires the heartbeat: returns the messages to re-transmit and
    /// re-arms the heartbeat timer while there is anything to say.
    pub fn heartbeat(&self) -> Result<Vec<Message>, PaxosError> {
        let mut inner = self.lock();
        let messages = inner.node.heartbeat()?;
        if !messages.is_empty() {
            inner.timers.set_heartbeat();
        }
        Ok(messages)
    }

    /// Returns the node's current role.
    pub fn role(&self) -> Role {
        self.lock().node.role()
    }

    /// Returns true if the node currently leads (hosts route client
    /// commands on this).
    pub fn is_leader(&self) -> bool {
        self.lock().node.is_leader()
    }

    /// Returns a copy of the node's durable progress.
    pub fn progress(&self) -> Progress {
        self.lock().node.progress()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<J, Q, T>> {
        // A poisoned mutex means a dispatch panicked with durability
        // work possibly unflushed; continuing would risk divergence.
        self.inner
            .lock()
            .expect("paxos engine mutex poisoned while durability work was in flight")
    }
}

impl<J: Journal, Q: QuorumAssessor, T: TimerDriver> Inner<J, Q, T> {
    /// Dispatches one message; not thread safe, called under the lock.
    fn dispatch(&mut self, message: &Message) -> Result<PaxosOutput, PaxosError> {
        if evidence_of_leader(&self.node, message) {
            if self.node.role() != Role::Follow {
                self.node.backdown();
            }
            self.timers.set_random_timeout();
        }

        let old_role = self.node.role();
        let result = self.node.paxos(message)?;
        let new_role = self.node.role();

        if matches!(new_role, Role::Lead | Role::Recover) {
            self.timers.set_heartbeat();
        }
        if old_role != new_role {
            if old_role == Role::Lead {
                self.timers.set_random_timeout();
            } else if new_role == Role::Lead {
                self.timers.clear_timeout();
            }
        }

        Ok(result)
    }
}

/// An observation that another node has made more progress than this
/// one: someone else is (or was) leading.
fn evidence_of_leader<J: Journal, Q: QuorumAssessor>(
    node: &PaxosNode<J, Q>,
    message: &Message,
) -> bool {
    match message {
        Message::Fixed(fixed) => {
            !node.is_leader()
                && fixed.from != node.node_id()
                && fixed.fixed_slot >= node.highest_fixed()
        }
        Message::Accept(accept) => {
            !node.is_leader()
                && accept.from != node.node_id()
                && (accept.slot > node.highest_accepted() || accept.slot > node.highest_fixed())
        }
        Message::AcceptResponse(response) => {
            node.is_leader()
                && response.from != node.node_id()
                && response.voter_highest_fixed > node.highest_fixed()
        }
        _ => false,
    }
}
