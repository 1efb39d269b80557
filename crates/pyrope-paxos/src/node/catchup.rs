//! Fixing announcements and targeted catch-up.
//!
//! A `Fixed` message is authoritative: the sender vouches that every slot
//! up to `fixed_slot` is fixed cluster-wide, and names the ballot of the
//! accept at the boundary. A receiver materializes what it can from its
//! own journal and asks the sender for the rest; the catch-up reply
//! carries accepts the responder has already fixed, so the receiver may
//! journal and fix them directly.

use pyrope_types::Slot;

use crate::journal::Journal;
use crate::message::{Catchup, CatchupResponse, Fixed, Message};
use crate::quorum::QuorumAssessor;
use crate::types::Role;

use super::{PaxosError, PaxosNode, PaxosOutput};

impl<J: Journal, Q: QuorumAssessor> PaxosNode<J, Q> {
    // ========================================================================
    // Fixed Handler
    // ========================================================================

    /// Handles a fixed-watermark announcement.
    ///
    /// Walks `(highest_fixed, fixed_slot]` through the journal, fixing
    /// each slot whose journalled ballot equals the announced one. The
    /// equality check is the safety gate: an accept under the announcing
    /// leader's own term is that term's unique — and therefore the
    /// chosen — value for the slot, while a stale accept from a deposed
    /// leader fails the check and stays out of the log. The walk stops at
    /// the first slot it cannot vouch for, and the remainder is requested
    /// from the sender.
    pub(crate) fn on_fixed(&mut self, fixed: &Fixed) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();

        if fixed.fixed_slot <= self.highest_fixed() {
            // Re-announcement of old news; heartbeats do this constantly.
            return Ok(output);
        }

        let mut advanced = false;
        let mut slot = self.highest_fixed().next();
        while slot <= fixed.fixed_slot {
            let Some(accept) = self.journal.load_accept(slot)? else {
                break;
            };
            if accept.ballot != fixed.fixed_ballot {
                break;
            }

            output.fixed.insert(slot, accept.command);
            self.progress.fixed_up_to(slot);
            advanced = true;
            slot = slot.next();
        }

        if advanced {
            self.journal.save_progress(&self.progress)?;
            tracing::debug!(
                node = %self.node_id(),
                fixed = %self.highest_fixed(),
                announced = %fixed.fixed_slot,
                "advanced fixed watermark from announcement"
            );
        }

        let still_missing: Vec<Slot> = (self.highest_fixed().as_u64() + 1
            ..=fixed.fixed_slot.as_u64())
            .map(Slot::new)
            .collect();
        if !still_missing.is_empty() {
            output.messages.push(Message::Catchup(Catchup {
                from: self.node_id(),
                to: fixed.from,
                slots: still_missing,
            }));
        }

        // Someone else fixing slots we had not fixed is authoritative
        // evidence of another leader.
        if advanced && self.role() != Role::Follow {
            self.backdown();
        }

        Ok(output)
    }

    // ========================================================================
    // Catchup Handlers
    // ========================================================================

    /// Answers a catch-up request from this node's journal.
    ///
    /// Only fixed slots are handed out — an unfixed accept is still
    /// subject to being overwritten and proves nothing. Slots the
    /// requester asked for that we have not fixed are simply omitted.
    pub(crate) fn on_catchup(&mut self, catchup: &Catchup) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();

        if catchup.to != self.node_id() {
            return Ok(output);
        }

        let mut accepts = Vec::new();
        for &slot in &catchup.slots {
            if slot > self.highest_fixed() {
                continue;
            }
            if let Some(accept) = self.journal.load_accept(slot)? {
                accepts.push(accept);
            }
        }

        output.messages.push(Message::CatchupResponse(CatchupResponse {
            from: self.node_id(),
            to: catchup.from,
            accepts,
        }));
        Ok(output)
    }

    /// Installs caught-up accepts.
    ///
    /// Every accept in the reply was fixed by the responder, so its
    /// command is *the* command for its slot; the journal entry may
    /// overwrite a stale unfixed accept of ours, and the promise is
    /// deliberately not consulted — promises guard future proposals, not
    /// the learning of settled history. Fixing still only advances
    /// contiguously: journalled repairs beyond a remaining gap wait for
    /// the next round.
    pub(crate) fn on_catchup_response(
        &mut self,
        response: &CatchupResponse,
    ) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();

        if response.to != self.node_id() {
            return Ok(output);
        }

        let mut accepts = response.accepts.clone();
        accepts.sort_by_key(|accept| accept.slot);

        let mut dirty = false;
        for accept in accepts {
            if accept.slot <= self.highest_fixed() {
                continue;
            }

            self.journal.journal_accept(&accept)?;
            if accept.slot > self.progress.highest_accepted() {
                self.progress.accepted_up_to(accept.slot);
            }
            dirty = true;

            if accept.slot == self.highest_fixed().next() {
                tracing::debug!(
                    node = %self.node_id(),
                    slot = %accept.slot,
                    from = %response.from,
                    "fixed slot from catch-up"
                );
                self.progress.fixed_up_to(accept.slot);
                output.fixed.insert(accept.slot, accept.command);
            }
        }

        if dirty {
            self.journal.save_progress(&self.progress)?;
        }

        // Catching up past our own proposals means another leader settled
        // them; whatever we were proposing is history.
        if !output.fixed.is_empty() && self.role() != Role::Follow {
            self.backdown();
        }
        Ok(output)
    }
}
