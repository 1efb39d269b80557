//! Voting handlers: Prepare and Accept.
//!
//! Every role votes. The promise rules here are the heart of Paxos
//! safety: a node that has promised a ballot rejects everything lower,
//! and a higher Accept counts as a promise even without a preceding
//! Prepare — receiving it proves a newer proposer won a prepare round
//! somewhere.

use crate::journal::Journal;
use crate::message::{Accept, Message, Prepare};
use crate::quorum::{Outcome, QuorumAssessor};
use crate::types::Role;

use super::{PaxosError, PaxosNode, PaxosOutput};

impl<J: Journal, Q: QuorumAssessor> PaxosNode<J, Q> {
    // ========================================================================
    // Prepare Handler
    // ========================================================================

    /// Handles a phase-1 probe.
    ///
    /// Rejects ballots below the promise and probes of already-fixed
    /// slots; promises higher ballots (durably, before responding); and
    /// re-acks an equal ballot so retransmitted prepares are idempotent.
    /// Both answers hand back the journalled accept at the slot — that is
    /// the evidence the recoverer computes its safe value from.
    pub(crate) fn on_prepare(&mut self, prepare: &Prepare) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();
        let promised = self.progress.highest_promised();

        if prepare.ballot < promised || prepare.slot <= self.progress.highest_fixed() {
            let nack = self.prepare_response(prepare, false)?;
            output.messages.push(Message::PrepareResponse(nack));
        } else if prepare.ballot > promised {
            self.progress.promise(prepare.ballot);
            self.journal.save_progress(&self.progress)?;

            let ack = self.prepare_response(prepare, true)?;
            output.messages.push(Message::PrepareResponse(ack.clone()));

            // A higher prepare from another node outranks whatever this
            // node was doing as leader or recoverer.
            if prepare.ballot.node_id() != self.node_id && self.role != Role::Follow {
                self.backdown();
            }
            if prepare.ballot.node_id() == self.node_id {
                output.merge(self.paxos(&Message::PrepareResponse(ack))?);
            }
        } else if prepare.ballot == promised {
            let ack = self.prepare_response(prepare, true)?;
            output.messages.push(Message::PrepareResponse(ack));
        } else {
            unreachable!(
                "unreachable prepare: progress={{{}}} prepare={prepare:?}",
                self.progress
            );
        }

        Ok(output)
    }

    // ========================================================================
    // Accept Handler
    // ========================================================================

    /// Handles a phase-2 request.
    ///
    /// An equal-or-higher ballot is journalled **before** any state is
    /// updated — the accept record is what every later recovery and
    /// catch-up reads. A higher ballot also raises the promise: accepting
    /// it is indistinguishable from having promised it.
    pub(crate) fn on_accept(&mut self, accept: &Accept) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();
        let promised = self.progress.highest_promised();

        let lower = accept.ballot < promised;
        let higher_for_fixed_slot =
            accept.ballot > promised && accept.slot <= self.progress.highest_fixed();

        if lower || higher_for_fixed_slot {
            let nack = self.accept_response(accept, false);
            output.messages.push(Message::AcceptResponse(nack));
        } else if accept.ballot >= promised {
            self.journal.journal_accept(accept)?;

            if accept.slot > self.progress.highest_accepted() {
                self.progress.accepted_up_to(accept.slot);
            }

            if accept.ballot > promised {
                self.progress.promise(accept.ballot);
                self.nack_own_outranked_proposal(accept);
            }

            self.journal.save_progress(&self.progress)?;

            let ack = self.accept_response(accept, true);
            output.messages.push(Message::AcceptResponse(ack));
            if accept.ballot.node_id() == self.node_id {
                output.merge(self.paxos(&Message::AcceptResponse(ack))?);
            }
        } else {
            unreachable!(
                "unreachable accept: progress={{{}}} accept={accept:?}",
                self.progress
            );
        }

        Ok(output)
    }

    /// A leader that just accepted a higher-ballot value at a slot it is
    /// still proposing at has been outvoted by itself: its own yes now
    /// belongs to the newer proposal. Flip the self-vote to a nack in the
    /// pending tally, and back down if the tally is thereby lost — this
    /// is how an isolated split-brain leader discovers its reign ended.
    fn nack_own_outranked_proposal(&mut self, accept: &Accept) {
        if self.role != Role::Lead {
            return;
        }
        let Some(pending) = self.accept_tallies.get(&accept.slot) else {
            return;
        };
        if pending.accept.ballot >= accept.ballot {
            return;
        }

        let own = pending.accept.clone();
        let nack = self.accept_response(&own, false);

        let pending = self
            .accept_tallies
            .get_mut(&accept.slot)
            .expect("tally still present");
        pending.responses.insert(self.node_id, nack);

        let votes = pending.votes();
        if self.assessor.assess_accepts(accept.slot, &votes) == Outcome::Lose {
            tracing::info!(
                node = %self.node_id,
                slot = %accept.slot,
                "own proposal outranked and lost, backing down"
            );
            self.backdown();
        }
    }
}
