//! Frame reassembly for the host comm interface.
//!
//! Frames arrive one at a time from the USB receive path through a
//! bounded queue. A message is `FIRST MID* LAST` with a strictly falling
//! `remaining` count, or a lone `LAST`. Any frame that breaks the
//! sequence, fails its checksum or would overflow the buffer is answered
//! with a NAK; the host restarts the message from `FIRST`.

use crate::config::{FRAME_QUEUE_DEPTH, REASSEMBLY_CAPACITY};
use crate::error::{Error, Result};
use crate::host::dispatch::{CommandDispatcher, Response};
use crate::host::frame::{FrameFlag, HostFrame, RawFrame};
use crate::host::store::ConfigStore;
use embassy_sync::channel::Channel;
use heapless::Vec;

/// Queue between the USB receive path and frame processing.
pub type FrameChannel<M> = Channel<M, RawFrame, FRAME_QUEUE_DEPTH>;

/// Result of feeding one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assembly {
    /// Frame accepted, message not complete yet.
    Pending,
    /// A full message is available in `message()`.
    Complete,
    /// Partial message discarded on request.
    Aborted,
    /// Control frame with nothing to do.
    Ignored,
}

/// What the frame task should do after one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Pending,
    /// Send this response report.
    Complete(Response),
    /// Frame or message refused; answer with NAK.
    Rejected(Error),
    Aborted,
    Ignored,
}

impl FrameOutcome {
    /// Report to send back to the host, if any.
    pub fn reply(&self) -> Option<RawFrame> {
        match self {
            FrameOutcome::Complete(response) => Some(*response.as_bytes()),
            FrameOutcome::Rejected(_) => Some(HostFrame::control(FrameFlag::Nak).encode()),
            _ => None,
        }
    }
}

pub struct FrameReassembler<const N: usize = REASSEMBLY_CAPACITY> {
    buffer: Vec<u8, N>,
    /// `remaining` of the last accepted frame while a sequence is open.
    last_remaining: Option<u16>,
}

impl<const N: usize> FrameReassembler<N> {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            last_remaining: None,
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_remaining = None;
    }

    /// Bytes buffered so far.
    pub fn message(&self) -> &[u8] {
        &self.buffer
    }

    pub fn in_progress(&self) -> bool {
        self.last_remaining.is_some()
    }

    /// Validate and apply one raw report.
    pub fn push(&mut self, raw: &[u8]) -> Result<Assembly> {
        match HostFrame::decode(raw) {
            Ok(frame) => self.push_frame(&frame),
            Err(e) => {
                warn!("Dropping comm frame: {}", e);
                self.reset();
                Err(e)
            }
        }
    }

    /// Apply one decoded frame.
    pub fn push_frame(&mut self, frame: &HostFrame) -> Result<Assembly> {
        let remaining = frame.remaining();
        match frame.flag() {
            FrameFlag::First => {
                self.reset();
                self.append(frame.payload())?;
                self.last_remaining = Some(remaining);
                Ok(Assembly::Pending)
            }
            FrameFlag::Mid => {
                self.check_sequence(remaining)?;
                self.append(frame.payload())?;
                self.last_remaining = Some(remaining);
                Ok(Assembly::Pending)
            }
            FrameFlag::Last => {
                if self.in_progress() {
                    self.check_sequence(remaining)?;
                } else {
                    self.buffer.clear();
                }
                self.append(frame.payload())?;
                self.last_remaining = None;
                Ok(Assembly::Complete)
            }
            FrameFlag::Abort => {
                debug!("Host aborted message after {} bytes", self.buffer.len());
                self.reset();
                Ok(Assembly::Aborted)
            }
            flag => {
                debug!("Ignoring {:?} frame", flag);
                Ok(Assembly::Ignored)
            }
        }
    }

    /// Feed one raw report and run the dispatcher on a complete message.
    pub async fn process<S: ConfigStore>(
        &mut self,
        raw: &[u8],
        dispatcher: &mut CommandDispatcher<S>,
    ) -> FrameOutcome {
        match self.push(raw) {
            Ok(Assembly::Pending) => FrameOutcome::Pending,
            Ok(Assembly::Aborted) => FrameOutcome::Aborted,
            Ok(Assembly::Ignored) => FrameOutcome::Ignored,
            Ok(Assembly::Complete) => {
                let result = dispatcher.dispatch(&self.buffer).await;
                self.reset();
                match result {
                    Ok(response) => FrameOutcome::Complete(response),
                    Err(e) => {
                        warn!("Message rejected: {}", e);
                        FrameOutcome::Rejected(e)
                    }
                }
            }
            Err(e) => FrameOutcome::Rejected(e),
        }
    }

    /// `remaining` must fall strictly within a sequence. A break resets the
    /// buffer and closes the sequence: every MID after it is NAKed until the
    /// host restarts the message with a FIRST.
    fn check_sequence(&mut self, remaining: u16) -> Result<()> {
        match self.last_remaining {
            Some(prev) if remaining < prev => Ok(()),
            prev => {
                warn!(
                    "Out-of-sequence frame (remaining {} after {:?})",
                    remaining, prev
                );
                self.reset();
                Err(Error::InvalidArgument)
            }
        }
    }

    /// Append without truncation. On overflow the buffered bytes are kept
    /// but the sequence is closed, so only a new FIRST can continue.
    fn append(&mut self, payload: &[u8]) -> Result<()> {
        if self.buffer.extend_from_slice(payload).is_err() {
            warn!(
                "Reassembly buffer full ({} + {} > {})",
                self.buffer.len(),
                payload.len(),
                N
            );
            self.last_remaining = None;
            return Err(Error::ResourceExhausted);
        }
        Ok(())
    }
}

impl<const N: usize> Default for FrameReassembler<N> {
    fn default() -> Self {
        Self::new()
    }
}
