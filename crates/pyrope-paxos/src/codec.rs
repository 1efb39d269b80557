//! Bit-exact serialization of protocol messages and progress records.
//!
//! # Wire Format
//!
//! All integers are big-endian and fixed width. A message starts with a
//! one-byte type discriminator:
//!
//! ```text
//! 0x01 Prepare           [from:u8][slot:u64][ballot:5B]
//! 0x02 PrepareResponse   [from:u8][to:u8][vote:16B][fixed:u64][accepted:u64][opt accept]
//! 0x03 Accept            [from:u8][slot:u64][ballot:5B][command]
//! 0x04 AcceptResponse    [from:u8][to:u8][vote:16B][fixed:u64]
//! 0x05 Fixed             [from:u8][fixed_slot:u64][fixed_ballot:5B]
//! 0x06 Catchup           [from:u8][to:u8][count:u32][slot:u64]...
//! 0x07 CatchupResponse   [from:u8][to:u8][count:u32][accept]...
//! ```
//!
//! A ballot is `[counter:u32][node_id:u8]`. A vote is
//! `[voter:u8][voted_for:u8][slot:u64][yes:u8][ballot:5B]`. A command is a
//! tagged union: `0x00` NoOp with no payload, or `0x01` App followed by
//! `[uuid_len:u16][uuid][payload_len:u32][payload]`. Optional fields are
//! prefixed with a boolean byte; lists with a `u32` count.
//!
//! The progress record is `[node_id:u8][counter:u32][ballot_node_id:u8]
//! [highest_accepted:u64][highest_fixed:u64]`.
//!
//! Decoding is strict: unknown discriminators, short buffers, non-boolean
//! option prefixes, and trailing bytes are all errors. Round-trip
//! equality is required over every message kind and the progress record.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use pyrope_types::{BallotNumber, Command, NodeId, Slot};

use crate::message::{
    Accept, AcceptResponse, Catchup, CatchupResponse, Fixed, Message, Prepare, PrepareResponse,
    Vote,
};
use crate::types::Progress;

// Message type discriminators. Stable on the wire; never renumber.
const MSG_PREPARE: u8 = 0x01;
const MSG_PREPARE_RESPONSE: u8 = 0x02;
const MSG_ACCEPT: u8 = 0x03;
const MSG_ACCEPT_RESPONSE: u8 = 0x04;
const MSG_FIXED: u8 = 0x05;
const MSG_CATCHUP: u8 = 0x06;
const MSG_CATCHUP_RESPONSE: u8 = 0x07;

// Command tags.
const CMD_NOOP: u8 = 0x00;
const CMD_APP: u8 = 0x01;

/// Errors from decoding wire bytes.
///
/// The core never sees these; hosts fail the connection that produced
/// the bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before the structure did.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The leading discriminator names no known message.
    #[error("unknown message type byte {byte:#04x}")]
    UnknownMessageType { byte: u8 },

    /// The command tag names no known command kind.
    #[error("unknown command tag byte {byte:#04x}")]
    UnknownCommandTag { byte: u8 },

    /// An option/boolean prefix was neither 0 nor 1.
    #[error("invalid boolean byte {byte:#04x}")]
    InvalidBool { byte: u8 },

    /// Decoding finished with bytes left over.
    #[error("{remaining} trailing bytes after message")]
    TrailingBytes { remaining: usize },
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a message with its leading type discriminator.
pub fn encode_message(message: &Message) -> Bytes {
    let mut buf = BytesMut::new();
    match message {
        Message::Prepare(m) => {
            buf.put_u8(MSG_PREPARE);
            buf.put_u8(m.from.as_u8());
            buf.put_u64(m.slot.as_u64());
            put_ballot(&mut buf, m.ballot);
        }
        Message::PrepareResponse(m) => {
            buf.put_u8(MSG_PREPARE_RESPONSE);
            buf.put_u8(m.from.as_u8());
            buf.put_u8(m.to.as_u8());
            put_vote(&mut buf, m.vote);
            buf.put_u64(m.voter_highest_fixed.as_u64());
            buf.put_u64(m.voter_highest_accepted.as_u64());
            match &m.journalled_accept {
                Some(accept) => {
                    buf.put_u8(1);
                    put_accept(&mut buf, accept);
                }
                None => buf.put_u8(0),
            }
        }
        Message::Accept(m) => {
            buf.put_u8(MSG_ACCEPT);
            put_accept(&mut buf, m);
        }
        Message::AcceptResponse(m) => {
            buf.put_u8(MSG_ACCEPT_RESPONSE);
            buf.put_u8(m.from.as_u8());
            buf.put_u8(m.to.as_u8());
            put_vote(&mut buf, m.vote);
            buf.put_u64(m.voter_highest_fixed.as_u64());
        }
        Message::Fixed(m) => {
            buf.put_u8(MSG_FIXED);
            buf.put_u8(m.from.as_u8());
            buf.put_u64(m.fixed_slot.as_u64());
            put_ballot(&mut buf, m.fixed_ballot);
        }
        Message::Catchup(m) => {
            buf.put_u8(MSG_CATCHUP);
            buf.put_u8(m.from.as_u8());
            buf.put_u8(m.to.as_u8());
            buf.put_u32(m.slots.len() as u32);
            for slot in &m.slots {
                buf.put_u64(slot.as_u64());
            }
        }
        Message::CatchupResponse(m) => {
            buf.put_u8(MSG_CATCHUP_RESPONSE);
            buf.put_u8(m.from.as_u8());
            buf.put_u8(m.to.as_u8());
            buf.put_u32(m.accepts.len() as u32);
            for accept in &m.accepts {
                put_accept(&mut buf, accept);
            }
        }
    }
    buf.freeze()
}

/// Encodes the progress record for the journal.
pub fn encode_progress(progress: &Progress) -> Bytes {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_u8(progress.node_id().as_u8());
    put_ballot(&mut buf, progress.highest_promised());
    buf.put_u64(progress.highest_accepted().as_u64());
    buf.put_u64(progress.highest_fixed().as_u64());
    buf.freeze()
}

fn put_ballot(buf: &mut BytesMut, ballot: BallotNumber) {
    buf.put_u32(ballot.counter());
    buf.put_u8(ballot.node_id().as_u8());
}

fn put_vote(buf: &mut BytesMut, vote: Vote) {
    buf.put_u8(vote.voter.as_u8());
    buf.put_u8(vote.voted_for.as_u8());
    buf.put_u64(vote.slot.as_u64());
    buf.put_u8(u8::from(vote.yes));
    put_ballot(buf, vote.ballot);
}

fn put_accept(buf: &mut BytesMut, accept: &Accept) {
    buf.put_u8(accept.from.as_u8());
    buf.put_u64(accept.slot.as_u64());
    put_ballot(buf, accept.ballot);
    match &accept.command {
        Command::NoOp => buf.put_u8(CMD_NOOP),
        Command::App { uuid, payload } => {
            buf.put_u8(CMD_APP);
            buf.put_u16(uuid.len() as u16);
            buf.put_slice(uuid);
            buf.put_u32(payload.len() as u32);
            buf.put_slice(payload);
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a message, requiring the buffer to be exactly one message.
pub fn decode_message(bytes: &[u8]) -> Result<Message, CodecError> {
    let mut buf = bytes;
    let discriminator = get_u8(&mut buf)?;
    let message = match discriminator {
        MSG_PREPARE => Message::Prepare(Prepare {
            from: NodeId::new(get_u8(&mut buf)?),
            slot: Slot::new(get_u64(&mut buf)?),
            ballot: get_ballot(&mut buf)?,
        }),
        MSG_PREPARE_RESPONSE => Message::PrepareResponse(PrepareResponse {
            from: NodeId::new(get_u8(&mut buf)?),
            to: NodeId::new(get_u8(&mut buf)?),
            vote: get_vote(&mut buf)?,
            voter_highest_fixed: Slot::new(get_u64(&mut buf)?),
            voter_highest_accepted: Slot::new(get_u64(&mut buf)?),
            journalled_accept: match get_bool(&mut buf)? {
                true => Some(get_accept(&mut buf)?),
                false => None,
            },
        }),
        MSG_ACCEPT => Message::Accept(get_accept(&mut buf)?),
        MSG_ACCEPT_RESPONSE => Message::AcceptResponse(AcceptResponse {
            from: NodeId::new(get_u8(&mut buf)?),
            to: NodeId::new(get_u8(&mut buf)?),
            vote: get_vote(&mut buf)?,
            voter_highest_fixed: Slot::new(get_u64(&mut buf)?),
        }),
        MSG_FIXED => Message::Fixed(Fixed {
            from: NodeId::new(get_u8(&mut buf)?),
            fixed_slot: Slot::new(get_u64(&mut buf)?),
            fixed_ballot: get_ballot(&mut buf)?,
        }),
        MSG_CATCHUP => {
            let from = NodeId::new(get_u8(&mut buf)?);
            let to = NodeId::new(get_u8(&mut buf)?);
            let count = get_u32(&mut buf)? as usize;
            let mut slots = Vec::with_capacity(count.min(buf.len() / 8 + 1));
            for _ in 0..count {
                slots.push(Slot::new(get_u64(&mut buf)?));
            }
            Message::Catchup(Catchup { from, to, slots })
        }
        MSG_CATCHUP_RESPONSE => {
            let from = NodeId::new(get_u8(&mut buf)?);
            let to = NodeId::new(get_u8(&mut buf)?);
            let count = get_u32(&mut buf)? as usize;
            let mut accepts = Vec::with_capacity(count.min(buf.len() / 15 + 1));
            for _ in 0..count {
                accepts.push(get_accept(&mut buf)?);
            }
            Message::CatchupResponse(CatchupResponse { from, to, accepts })
        }
        byte => return Err(CodecError::UnknownMessageType { byte }),
    };

    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: buf.len(),
        });
    }
    Ok(message)
}

/// Decodes a progress record previously written by [`encode_progress`].
pub fn decode_progress(bytes: &[u8]) -> Result<Progress, CodecError> {
    let mut buf = bytes;
    let node_id = NodeId::new(get_u8(&mut buf)?);
    let highest_promised = get_ballot(&mut buf)?;
    let highest_accepted = Slot::new(get_u64(&mut buf)?);
    let highest_fixed = Slot::new(get_u64(&mut buf)?);

    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: buf.len(),
        });
    }
    Ok(Progress::new(
        node_id,
        highest_promised,
        highest_accepted,
        highest_fixed,
    ))
}

fn get_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8]) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u64())
}

fn get_bool(buf: &mut &[u8]) -> Result<bool, CodecError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        byte => Err(CodecError::InvalidBool { byte }),
    }
}

fn get_bytes(buf: &mut &[u8], len: usize) -> Result<Bytes, CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_ballot(buf: &mut &[u8]) -> Result<BallotNumber, CodecError> {
    let counter = get_u32(buf)?;
    let node_id = NodeId::new(get_u8(buf)?);
    Ok(BallotNumber::new(counter, node_id))
}

fn get_vote(buf: &mut &[u8]) -> Result<Vote, CodecError> {
    Ok(Vote {
        voter: NodeId::new(get_u8(buf)?),
        voted_for: NodeId::new(get_u8(buf)?),
        slot: Slot::new(get_u64(buf)?),
        yes: get_bool(buf)?,
        ballot: get_ballot(buf)?,
    })
}

fn get_accept(buf: &mut &[u8]) -> Result<Accept, CodecError> {
    let from = NodeId::new(get_u8(buf)?);
    let slot = Slot::new(get_u64(buf)?);
    let ballot = get_ballot(buf)?;
    let command = match get_u8(buf)? {
        CMD_NOOP => Command::NoOp,
        CMD_APP => {
            let uuid_len = get_u16(buf)? as usize;
            let uuid = get_bytes(buf, uuid_len)?;
            let payload_len = get_u32(buf)? as usize;
            let payload = get_bytes(buf, payload_len)?;
            Command::App { uuid, payload }
        }
        byte => return Err(CodecError::UnknownCommandTag { byte }),
    };
    Ok(Accept {
        from,
        slot,
        ballot,
        command,
    })
}
