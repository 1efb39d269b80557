//! Recovery: tallying prepare responses.
//!
//! A recoverer probes one slot per outstanding prepare tally. Winning a
//! slot means a quorum promised the term **and** handed over everything
//! they had journalled there, so the recoverer can compute the one value
//! it is allowed to propose: the highest-ballot accept any voter
//! reported, or `NoOp` if the slot is uncontested. Once no probes remain
//! outstanding the node has accounted for the whole log tail and
//! promotes itself to leader.

use pyrope_types::{Command, Slot};

use crate::journal::Journal;
use crate::message::{Accept, Message, Prepare, PrepareResponse};
use crate::quorum::{Outcome, QuorumAssessor};
use crate::types::Role;

use super::{AcceptVotes, PaxosError, PaxosNode, PaxosOutput};

impl<J: Journal, Q: QuorumAssessor> PaxosNode<J, Q> {
    /// Handles a prepare response while recovering.
    ///
    /// Ignored in any other role, and when addressed to another node —
    /// broadcast transports may deliver everything everywhere.
    pub(crate) fn on_prepare_response(
        &mut self,
        response: &PrepareResponse,
    ) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();

        if self.role != Role::Recover || response.to != self.node_id() {
            return Ok(output);
        }

        // A voter that has fixed more than we have is following a newer
        // leader; our term is stale no matter how the votes fall. Fixed
        // announcements and catch-up will bring us forward.
        if response.voter_highest_fixed > self.highest_fixed() {
            tracing::info!(
                node = %self.node_id(),
                voter = %response.from,
                voter_fixed = %response.voter_highest_fixed,
                our_fixed = %self.highest_fixed(),
                "voter has fixed more than us, backing down"
            );
            self.backdown();
            return Ok(output);
        }

        let slot = response.vote.slot;
        let votes_by_node = self.prepare_tallies.entry(slot).or_default();
        votes_by_node.insert(response.from, response.clone());

        let votes: Vec<_> = votes_by_node.values().map(|r| r.vote).collect();
        match self.assessor.assess_promises(slot, &votes) {
            Outcome::Wait => {}
            Outcome::Lose => {
                tracing::info!(
                    node = %self.node_id(),
                    slot = %slot,
                    "prepare round lost, backing down"
                );
                self.backdown();
            }
            Outcome::Win => {
                output.merge(self.on_prepare_win(slot)?);
            }
        }

        Ok(output)
    }

    /// A quorum promised `slot`. Extend probing if the voters revealed
    /// higher accepted slots, propose the safe value for this slot, and
    /// promote to leader once nothing remains outstanding.
    fn on_prepare_win(&mut self, slot: Slot) -> Result<PaxosOutput, PaxosError> {
        let mut output = PaxosOutput::empty();
        let term = self.term().expect("recovering node always has a term");

        let tally = self
            .prepare_tallies
            .get(&slot)
            .expect("won slot has a tally");

        let max_voter_accepted = tally
            .values()
            .map(|r| r.voter_highest_accepted)
            .max()
            .unwrap_or(Slot::ZERO);

        // The one value this term may propose at the slot: the command of
        // the highest-ballot accept any voter reported, NoOp when the
        // slot is uncontested.
        let chosen_command = tally
            .values()
            .filter_map(|r| r.journalled_accept.as_ref())
            .max_by_key(|accept| accept.rank())
            .map(|accept| accept.command.clone())
            .unwrap_or(Command::NoOp);

        // Voters may have accepted slots beyond anything we have probed
        // yet; every additional slot needs its own prepare round before
        // we can lead.
        let highest_probed = *self
            .prepare_tallies
            .keys()
            .next_back()
            .expect("tally map is non-empty while a win is processed");
        if max_voter_accepted > highest_probed {
            for probe in (highest_probed.as_u64() + 1)..=max_voter_accepted.as_u64() {
                let probe = Slot::new(probe);
                self.prepare_tallies.entry(probe).or_default();
                output
                    .messages
                    .push(Message::Prepare(Prepare::new(self.node_id(), probe, term)));
            }
        }

        let accept = Accept::new(self.node_id(), slot, term, chosen_command);
        self.accept_tallies
            .insert(slot, AcceptVotes::new(accept.clone()));
        output.messages.push(Message::Accept(accept.clone()));

        // Vote for our own proposal; the nested dispatch journals it and
        // feeds the self-ack into the new accept tally.
        output.merge(self.paxos(&Message::Accept(accept))?);

        self.prepare_tallies.remove(&slot);
        if self.prepare_tallies.is_empty() && self.role() == Role::Recover {
            tracing::info!(node = %self.node_id(), term = %term, "recovery complete, leading");
            self.ascend(Role::Lead);
        }

        Ok(output)
    }
}
