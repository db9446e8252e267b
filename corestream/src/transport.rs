//! Transport abstraction (spec §4.1, C1).
//!
//! A [`Transport`] is a paired point-to-point bidirectional channel: `send`
//! enqueues one framed message (order preserved, zero-length is a valid
//! distinct value), `recv` blocks for the next one. Everything upstream of
//! this module only depends on the trait, not on sockets — the spec treats
//! the underlying reliable ordered transport as an external collaborator,
//! so [`TcpTransport`] is one conforming implementation, not the contract
//! itself.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};

use crate::error::{PipelineError, Result};
use crate::protocol::StreamIdentity;

/// One bidirectional, message-framed point-to-point channel.
pub trait Transport: Send {
    /// Enqueue `msg` as one framed message. A zero-length message is valid
    /// and distinct from no message at all.
    fn send(&mut self, msg: &[u8]) -> Result<()>;
    /// Block until the next framed message arrives and return its bytes.
    fn recv(&mut self) -> Result<Vec<u8>>;
}

/// Length-prefixed framing over a `TcpStream`: a big-endian `u32` byte count
/// followed by that many payload bytes. TCP already gives FIFO, reliable,
/// ordered delivery per connection, satisfying the chunk-ordering invariant
/// in spec §3.
pub struct TcpTransport {
    stream: TcpStream,
    peer_label: String,
    /// Which of the two session streams this channel carries, so that an
    /// I/O fault is reported against the right stream (spec §7).
    identity: StreamIdentity,
}

impl TcpTransport {
    /// Sender-side: connect to the receiver's bound address.
    pub fn connect(addr: &str, identity: StreamIdentity) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|source| PipelineError::TransportInit {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            peer_label: addr.to_string(),
            identity,
        })
    }

    /// Receiver-side: bind `addr` and accept exactly one connection. Kept as
    /// a convenience for the single-listener case and for tests; a session
    /// with more than one stream should use [`TcpTransport::bind`] for every
    /// listener before calling [`TcpTransport::accept_on`] on any of them, so
    /// all listeners are up before the sender starts connecting to any of
    /// them.
    pub fn accept(addr: &str, identity: StreamIdentity) -> Result<Self> {
        let listener = Self::bind(addr)?;
        Self::accept_on(&listener, addr, identity)
    }

    /// Bind `addr` without accepting yet, so a caller can bind every
    /// listener a session needs before blocking on any of their accepts.
    pub fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr).map_err(|source| PipelineError::TransportInit {
            addr: addr.to_string(),
            source,
        })
    }

    /// Accept exactly one connection on an already-bound listener. `addr` is
    /// only used to label a failure.
    pub fn accept_on(listener: &TcpListener, addr: &str, identity: StreamIdentity) -> Result<Self> {
        let (stream, peer) = listener
            .accept()
            .map_err(|source| PipelineError::TransportInit {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            peer_label: peer.to_string(),
            identity,
        })
    }

    fn fault(&self, source: io::Error) -> PipelineError {
        PipelineError::TransportFault {
            stream: self.identity,
            source,
        }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, msg: &[u8]) -> Result<()> {
        let len = msg.len() as u32;
        self.stream
            .write_all(&len.to_be_bytes())
            .map_err(|e| self.fault(e))?;
        if !msg.is_empty() {
            self.stream.write_all(msg).map_err(|e| self.fault(e))?;
        }
        self.stream.flush().map_err(|e| self.fault(e))?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .map_err(|e| self.fault(e))?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        if len > 0 {
            self.stream
                .read_exact(&mut payload)
                .map_err(|e| self.fault(e))?;
        }
        Ok(payload)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer_label)
            .finish()
    }
}
