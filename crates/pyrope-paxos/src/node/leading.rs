//! Leading: tallying accept responses and fixing slots.
//!
//! Quorums can complete out of slot order — a later slot may gather its
//! quorum while an earlier one still waits on a straggler — but fixing
//! must be announced in log order. The contiguous commit scan bridges the
//! two: chosen tallies accumulate until the prefix starting at
//! `highest_fixed + 1` is solidly chosen, then the whole prefix fixes in
//! one step.

use crate::journal::Journal;
use crate::message::{Accept, AcceptResponse, Message};
use crate::quorum::{Outcome, QuorumAssessor};
use crate::types::Role;

use super::{AcceptVotes, PaxosError, PaxosNode, PaxosOutput};

use pyrope_types::Command;

impl<J: Journal, Q: QuorumAssessor> PaxosNode<J, Q> {
    /// Handles an accept response while leading or recovering.
    pub(crate) fn on_accept_response(
        &mut self,
        response: &AcceptResponse,
    ) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();

        if self.role() == Role::Follow || response.to != self.node_id() {
            return Ok(output);
        }

        // An isolated leader rejoining the cluster learns here that the
        // others moved on without it.
        if self.role() == Role::Lead && response.voter_highest_fixed > self.highest_fixed() {
            tracing::info!(
                node = %self.node_id(),
                voter = %response.from,
                voter_fixed = %response.voter_highest_fixed,
                our_fixed = %self.highest_fixed(),
                "voter has fixed more than us, abdicating"
            );
            self.backdown();
            return Ok(output);
        }

        let slot = response.vote.slot;
        let votes = {
            let Some(tally) = self.accept_tallies.get_mut(&slot) else {
                // No pending proposal here; a late response for a slot
                // the scan already consumed.
                return Ok(output);
            };
            if tally.chosen {
                return Ok(output);
            }
            tally.responses.insert(response.from, *response);
            tally.votes()
        };

        match self.assessor.assess_accepts(slot, &votes) {
            Outcome::Wait => {}
            Outcome::Lose => {
                tracing::info!(
                    node = %self.node_id(),
                    slot = %slot,
                    "accept round lost, backing down"
                );
                self.backdown();
            }
            Outcome::Win => {
                let node_id = self.node_id();
                let tally = self
                    .accept_tallies
                    .get_mut(&slot)
                    .expect("tally present on win");
                tally.chosen = true;
                tracing::info!(
                    node = %node_id,
                    slot = %slot,
                    ballot = %tally.accept.ballot,
                    "accept round won"
                );
                output.merge(self.commit_scan()?);
            }
        }

        Ok(output)
    }

    /// Fixes every chosen slot in the contiguous prefix above
    /// `highest_fixed`, consuming the tallies and announcing the new
    /// watermark.
    ///
    /// Stops at the first slot that is missing from the tallies or not
    /// yet chosen — a quorum at a later slot fixes nothing until the gap
    /// before it closes.
    fn commit_scan(&mut self) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();

        let mut fixable = Vec::new();
        let mut expected = self.highest_fixed().next();
        for (&slot, tally) in self.accept_tallies.iter() {
            if slot != expected || !tally.chosen {
                break;
            }
            fixable.push(slot);
            expected = expected.next();
        }
        if fixable.is_empty() {
            return Ok(output);
        }

        for slot in fixable {
            let accept = self
                .journal
                .load_accept(slot)?
                .expect("chosen slot must have a journalled accept");
            debug_assert!(accept.slot == slot, "journal keyed accept by wrong slot");

            output.fixed.insert(slot, accept.command);
            self.progress.fixed_up_to(slot);
            self.accept_tallies.remove(&slot);
        }

        self.journal.save_progress(&self.progress)?;
        let fixed = self.current_fixed_message()?;
        tracing::info!(
            node = %self.node_id(),
            fixed_slot = %fixed.fixed_slot,
            "fixed through slot"
        );
        output.messages.push(Message::Fixed(fixed));

        Ok(output)
    }

    /// Builds the next proposal of this leader: the command goes to the
    /// first unproposed slot under the current term, with an empty tally
    /// awaiting votes. The caller must self-deliver the accept (which
    /// journals it and casts our own vote) and broadcast it.
    ///
    /// Chained proposals land on consecutive slots because the
    /// self-delivery raises `highest_accepted` before the next call.
    pub(crate) fn next_accept(&mut self, command: Command) -> Accept {
        assert!(
            self.is_leader(),
            "only a leader proposes - node {} is {}",
            self.node_id(),
            self.role()
        );
        let term = self.term().expect("leading node always has a term");

        let accept = Accept::new(
            self.node_id(),
            self.highest_accepted().next(),
            term,
            command,
        );
        self.accept_tallies
            .insert(accept.slot, AcceptVotes::new(accept.clone()));
        accept
    }
}
