//! Wire protocol: stream identity, the per-step alert codec, and the frame
//! types exchanged between a [`crate::sender::StreamSender`] and a
//! [`crate::receiver::StreamReceiver`] (spec §4.9, §6).
//!
//! Binary layout: the 1-byte tag and any integer-valued payload is
//! big-endian, except `TimingReply`'s `f64`, which the wire format fixes as
//! little-endian:
//!
//! ```text
//! +------+----------------------------+
//! | tag  |   ... payload per tag ...  |
//! | (1B) |                            |
//! +------+----------------------------+
//! ```
//!
//! `Filename` and `Chunk` carry raw bytes; `FileEnd` carries nothing (it is
//! the zero-length chunk sentinel turned into an explicit variant here so
//! that callers never have to special-case an empty `Chunk`); `Alert` carries
//! one of the three step-alert codes; `TimingReply` carries an 8-byte f64;
//! `Ack` carries a UTF-8 string.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PipelineError, Result};

/// The two stream identities that exist per session (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamIdentity {
    /// Mandatory, always sent in full.
    Reduced,
    /// Optional, dynamically truncated by the progress threshold.
    Augmentation,
}

impl StreamIdentity {
    /// Port offset from `base_port` used by this stream (spec §6).
    pub fn port_offset(self) -> u16 {
        match self {
            StreamIdentity::Reduced => 0,
            StreamIdentity::Augmentation => 1,
        }
    }
}

/// Step-alert codes sent after all files in a step have been transmitted
/// (spec §3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCode {
    /// `'0'` — this was the last step of the session.
    EndSession,
    /// `'1'` — another file is coming within the same step (not ack'd).
    MoreFilesSameStep,
    /// `'2'` — advance to the next step.
    NextStep,
}

impl AlertCode {
    fn to_ascii(self) -> u8 {
        match self {
            AlertCode::EndSession => b'0',
            AlertCode::MoreFilesSameStep => b'1',
            AlertCode::NextStep => b'2',
        }
    }

    fn from_ascii(b: u8) -> Result<Self> {
        match b {
            b'0' => Ok(AlertCode::EndSession),
            b'1' => Ok(AlertCode::MoreFilesSameStep),
            b'2' => Ok(AlertCode::NextStep),
            other => Err(PipelineError::ProtocolViolation(format!(
                "alert byte outside {{'0','1','2'}}: 0x{other:02x}"
            ))),
        }
    }

    /// An alert of this kind is followed by an ack from the peer, unless it
    /// is `MoreFilesSameStep` (spec §4.4 invariant).
    pub fn expects_ack(self) -> bool {
        !matches!(self, AlertCode::MoreFilesSameStep)
    }
}

/// Internal tag bytes. Distinct from [`AlertCode`]'s wire encoding — these
/// tag the *kind of message*, not the alert value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Filename = 0x01,
    Chunk = 0x02,
    FileEnd = 0x03,
    Alert = 0x04,
    TimingReply = 0x05,
    Ack = 0x06,
}

impl TryFrom<u8> for Tag {
    type Error = PipelineError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Tag::Filename),
            0x02 => Ok(Tag::Chunk),
            0x03 => Ok(Tag::FileEnd),
            0x04 => Ok(Tag::Alert),
            0x05 => Ok(Tag::TimingReply),
            0x06 => Ok(Tag::Ack),
            other => Err(PipelineError::ProtocolViolation(format!(
                "unknown frame tag: 0x{other:02x}"
            ))),
        }
    }
}

/// A single message on the wire between one sender/receiver pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A zero-terminated filename (the terminator itself is not carried;
    /// it is implied by the tag boundary).
    Filename(Bytes),
    /// A non-empty chunk of file data, at most `chunk_size` bytes.
    Chunk(Bytes),
    /// End-of-file sentinel for the file currently being transferred.
    FileEnd,
    /// Step-alert code, sent once all files in a step have EOF'd.
    Alert(AlertCode),
    /// Receiver's measured wall-clock time for the chunk it just received.
    TimingReply(f64),
    /// Informational ack string, sent after a non-`MoreFilesSameStep` alert.
    Ack(String),
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Frame::Filename(b) => b.len(),
            Frame::Chunk(b) => b.len(),
            Frame::FileEnd => 0,
            Frame::Alert(_) => 1,
            Frame::TimingReply(_) => 8,
            Frame::Ack(s) => s.len(),
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Filename(name) => {
                buf.put_u8(Tag::Filename as u8);
                buf.put_slice(name);
            }
            Frame::Chunk(data) => {
                buf.put_u8(Tag::Chunk as u8);
                buf.put_slice(data);
            }
            Frame::FileEnd => {
                buf.put_u8(Tag::FileEnd as u8);
            }
            Frame::Alert(code) => {
                buf.put_u8(Tag::Alert as u8);
                buf.put_u8(code.to_ascii());
            }
            Frame::TimingReply(seconds) => {
                buf.put_u8(Tag::TimingReply as u8);
                buf.put_f64_le(*seconds);
            }
            Frame::Ack(s) => {
                buf.put_u8(Tag::Ack as u8);
                buf.put_slice(s.as_bytes());
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(PipelineError::ProtocolViolation(
                "empty message: missing frame tag".into(),
            ));
        }
        let tag = Tag::try_from(data[0])?;
        let rest = &data[1..];
        match tag {
            Tag::Filename => Ok(Frame::Filename(Bytes::copy_from_slice(rest))),
            Tag::Chunk => Ok(Frame::Chunk(Bytes::copy_from_slice(rest))),
            Tag::FileEnd => Ok(Frame::FileEnd),
            Tag::Alert => {
                if rest.len() != 1 {
                    return Err(PipelineError::ProtocolViolation(format!(
                        "ALERT frame expected 1 byte, got {}",
                        rest.len()
                    )));
                }
                Ok(Frame::Alert(AlertCode::from_ascii(rest[0])?))
            }
            Tag::TimingReply => {
                if rest.len() != 8 {
                    return Err(PipelineError::ProtocolViolation(format!(
                        "TIMING_REPLY expected 8 bytes, got {}",
                        rest.len()
                    )));
                }
                Ok(Frame::TimingReply((&rest[..]).get_f64_le()))
            }
            Tag::Ack => {
                let s = String::from_utf8(rest.to_vec()).map_err(|e| {
                    PipelineError::ProtocolViolation(format!("ack is not valid utf-8: {e}"))
                })?;
                Ok(Frame::Ack(s))
            }
        }
    }
}
