//! Per-connection upload session.
//!
//! A session serves frames on one connection, in arrival order:
//!
//! ```text
//! AwaitHeader -> AccumulatePayload -> Persist -> Reply -> AwaitHeader ...
//!      |                |               |          |
//!      +--> Closed      +---------------+----------+--> Aborted
//! ```
//!
//! Bytes received past the end of a frame are kept and decoded as the start
//! of the next frame on the same connection.

use crate::accumulator::{self, read_chunk};
use crate::config::Config;
use crate::error::{FrameError, TransferError};
use crate::hasher;
use crate::protocol::{self, TransferHeader, PREFIX_LEN};
use crate::storage::FileStore;
use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace};

/// Receive size for the first chunk of a frame.
pub const DEFAULT_HEADER_CHUNK_SIZE: usize = 2048;

/// Read sizes used by a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub header_chunk_size: usize,
    pub payload_chunk_size: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            header_chunk_size: DEFAULT_HEADER_CHUNK_SIZE,
            payload_chunk_size: accumulator::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&Config> for SessionLimits {
    fn from(config: &Config) -> Self {
        Self {
            header_chunk_size: config.header_chunk_size.max(PREFIX_LEN),
            payload_chunk_size: config.payload_chunk_size.max(1),
        }
    }
}

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first bytes of a frame.
    AwaitHeader,
    /// Header decoded, collecting payload and digest.
    AccumulatePayload,
    /// Handing the payload to the file store.
    Persist,
    /// Sending the computed digest back.
    Reply,
    /// Connection ended without error.
    Closed,
    /// Connection torn down after a transfer error.
    Aborted,
}

/// A frame received in full.
#[derive(Debug)]
pub struct ReceivedFrame {
    pub header: TransferHeader,
    /// Header exactly as it arrived on the wire.
    pub header_bytes: Bytes,
    pub payload: Bytes,
    /// Digest the sender appended to the frame.
    pub sender_digest: Bytes,
}

impl ReceivedFrame {
    /// Digest over the header and payload bytes, `hash_length` long.
    pub fn compute_digest(&self) -> Vec<u8> {
        hasher::digest_parts(
            &[&self.header_bytes[..], &self.payload[..]],
            self.header.hash_length as usize,
        )
    }
}

/// Summary of a frame that was stored and answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReceipt {
    pub filename: String,
    pub file_size: u32,
    /// Digest sent back to the client.
    pub digest: Vec<u8>,
    /// Whether the sender's trailing digest equals ours.
    pub sender_digest_matches: bool,
}

/// Result of driving one frame cycle.
#[derive(Debug)]
pub enum FrameOutcome {
    Completed(FrameReceipt),
    /// Peer closed the connection between frames.
    PeerClosed,
    /// No frame started before the read timeout.
    Idle,
}

/// Why a session stopped serving its connection.
#[derive(Debug)]
pub enum SessionEnd {
    PeerClosed,
    Idle,
    /// The frame budget handed to `serve` was used up.
    BudgetExhausted,
    Aborted(TransferError),
}

/// What a finished session did.
#[derive(Debug)]
pub struct SessionReport {
    pub frames: u64,
    pub bytes_stored: u64,
    pub end: SessionEnd,
}

enum Incoming {
    Header(TransferHeader, Bytes),
    PeerClosed,
    Idle,
}

/// Upload session over a single connection.
pub struct Session<'a, S> {
    stream: S,
    store: &'a dyn FileStore,
    limits: SessionLimits,
    /// Bytes received but not yet consumed by a frame.
    pending: BytesMut,
    state: SessionState,
    frames: u64,
    bytes_stored: u64,
    /// Shared counter bumped as each frame completes.
    frame_counter: Option<&'a AtomicU64>,
}

impl<'a, S: Read + Write> Session<'a, S> {
    pub fn new(stream: S, store: &'a dyn FileStore, limits: SessionLimits) -> Self {
        Self {
            stream,
            store,
            limits,
            pending: BytesMut::with_capacity(limits.header_chunk_size),
            state: SessionState::AwaitHeader,
            frames: 0,
            bytes_stored: 0,
            frame_counter: None,
        }
    }

    /// Also count completed frames into `counter`, one at a time.
    pub fn with_frame_counter(mut self, counter: &'a AtomicU64) -> Self {
        self.frame_counter = Some(counter);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames completed on this connection.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes received past the last completed frame.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Serve frames until the peer leaves, an error occurs, or `budget`
    /// frames have been completed.
    ///
    /// Transfer errors end the session but are not returned as errors; they
    /// are reported in `SessionReport::end`.
    pub fn serve(&mut self, budget: Option<u64>) -> SessionReport {
        let end = loop {
            if budget.is_some_and(|b| self.frames >= b) {
                self.state = SessionState::Closed;
                break SessionEnd::BudgetExhausted;
            }

            match self.process_frame() {
                Ok(FrameOutcome::Completed(_)) => continue,
                Ok(FrameOutcome::PeerClosed) => break SessionEnd::PeerClosed,
                Ok(FrameOutcome::Idle) => break SessionEnd::Idle,
                Err(e) => {
                    debug!(error = %e, frames = self.frames, "Session aborted");
                    break SessionEnd::Aborted(e);
                }
            }
        };

        SessionReport {
            frames: self.frames,
            bytes_stored: self.bytes_stored,
            end,
        }
    }

    /// Run one full frame cycle: receive, persist, reply.
    pub fn process_frame(&mut self) -> Result<FrameOutcome, TransferError> {
        let result = self.try_process_frame();
        match &result {
            Ok(FrameOutcome::Completed(_)) => self.state = SessionState::AwaitHeader,
            Ok(_) => self.state = SessionState::Closed,
            Err(_) => self.state = SessionState::Aborted,
        }
        result
    }

    fn try_process_frame(&mut self) -> Result<FrameOutcome, TransferError> {
        let frame = match self.receive_frame()? {
            Some(frame) => frame,
            None if self.state == SessionState::Closed => return Ok(FrameOutcome::PeerClosed),
            None => return Ok(FrameOutcome::Idle),
        };

        self.state = SessionState::Persist;
        self.store.store(&frame.header.filename, &frame.payload)?;

        self.state = SessionState::Reply;
        let digest = frame.compute_digest();
        self.stream.write_all(&digest)?;
        self.stream.flush()?;

        let sender_digest_matches = frame.sender_digest[..] == digest[..];
        if !sender_digest_matches {
            debug!(
                filename = %frame.header.filename,
                "Sender digest differs from computed digest"
            );
        }

        self.frames += 1;
        self.bytes_stored += frame.payload.len() as u64;
        if let Some(counter) = self.frame_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }

        info!(
            filename = %frame.header.filename,
            extension = %frame.header.extension,
            file_size = frame.header.file_size,
            hash_length = frame.header.hash_length,
            "File received"
        );

        Ok(FrameOutcome::Completed(FrameReceipt {
            filename: frame.header.filename,
            file_size: frame.header.file_size,
            digest,
            sender_digest_matches,
        }))
    }

    /// Receive the next complete frame.
    ///
    /// Returns `None` when the connection ended cleanly before a frame began;
    /// `state()` is then `Closed` for a disconnect and `AwaitHeader` for an
    /// idle timeout.
    pub fn receive_frame(&mut self) -> Result<Option<ReceivedFrame>, TransferError> {
        self.state = SessionState::AwaitHeader;
        let (header, header_bytes) = match self.await_header()? {
            Incoming::Header(header, bytes) => (header, bytes),
            Incoming::PeerClosed => {
                self.state = SessionState::Closed;
                return Ok(None);
            }
            Incoming::Idle => return Ok(None),
        };

        debug!(
            filename = %header.filename,
            created = %header.created,
            created_at = ?header.created_at(),
            file_size = header.file_size,
            hash_length = header.hash_length,
            "Header decoded"
        );

        self.state = SessionState::AccumulatePayload;
        let body_len = header.body_len().ok_or(FrameError::BodyTooLarge {
            file_size: header.file_size,
            hash_length: header.hash_length,
        })?;
        let seed = self.pending.split();
        let filled = accumulator::accumulate(
            &mut self.stream,
            seed,
            body_len,
            self.limits.payload_chunk_size,
        )?;
        self.pending = filled.surplus;
        if !self.pending.is_empty() {
            trace!(surplus = self.pending.len(), "Bytes carried into next frame");
        }

        let file_size = header.file_size as usize;
        let payload = filled.body.slice(..file_size);
        let sender_digest = filled.body.slice(file_size..);

        Ok(Some(ReceivedFrame {
            header,
            header_bytes,
            payload,
            sender_digest,
        }))
    }

    /// Decode a header from pending bytes, receiving at most one chunk.
    ///
    /// A header that is still incomplete after that chunk is malformed.
    fn await_header(&mut self) -> Result<Incoming, TransferError> {
        let mut received = false;
        let mut needed = PREFIX_LEN;

        loop {
            if !self.pending.is_empty() {
                match protocol::decode_header(&self.pending) {
                    Ok((header, rest)) => {
                        let header_len = self.pending.len() - rest.len();
                        let header_bytes = self.pending.split_to(header_len).freeze();
                        return Ok(Incoming::Header(header, header_bytes));
                    }
                    Err(FrameError::MalformedHeader { needed: n, .. }) if !received => needed = n,
                    Err(e) => return Err(e.into()),
                }
            }

            let buffered = self.pending.len();
            match read_chunk(&mut self.stream, &mut self.pending, self.limits.header_chunk_size) {
                Ok(0) if buffered == 0 => return Ok(Incoming::PeerClosed),
                Ok(0) => {
                    return Err(TransferError::ConnectionClosed {
                        received: buffered,
                        expected: needed,
                    })
                }
                Ok(n) => {
                    trace!(bytes = n, "Header chunk received");
                    received = true;
                }
                Err(e) if buffered == 0 && is_timeout(&e) => return Ok(Incoming::Idle),
                Err(e) => return Err(TransferError::from_read(e, buffered, needed)),
            }
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
