//! Reassembly of transport fragments into complete logical messages.

use bytes::{Bytes, BytesMut};

use super::frame::{CloseFrameInfo, FrameKind, WsFragment};

/// Outcome of feeding one fragment into the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// More fragments are needed before the message is complete.
    Incomplete,
    /// The message is complete; the buffer is ready for the next one.
    Complete(CompletedMessage),
    /// The fragment declared a message larger than the buffer. Nothing was written.
    Overflow { declared: usize, capacity: usize },
}

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletedMessage {
    Text(Bytes),
    Close(CloseFrameInfo),
}

/// Fixed-capacity buffer for exactly one in-flight message.
///
/// Fragments of one message arrive in order; an offset of zero always starts a new message,
/// discarding whatever partial message was buffered before.
#[derive(Debug)]
pub struct FrameReassembler {
    storage: BytesMut,
    capacity: usize,
    filled_len: usize,
}

impl FrameReassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: BytesMut::with_capacity(capacity),
            capacity,
            filled_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    pub fn is_empty(&self) -> bool {
        self.filled_len == 0
    }

    pub fn reset(&mut self) {
        self.storage.clear();
        self.filled_len = 0;
    }

    #[inline]
    pub fn accept_fragment(&mut self, fragment: &WsFragment) -> Reassembly {
        self.accept(
            &fragment.payload,
            fragment.offset,
            fragment.total_len,
            fragment.kind,
        )
    }

    pub fn accept(
        &mut self,
        fragment: &[u8],
        offset: usize,
        total_len: usize,
        kind: FrameKind,
    ) -> Reassembly {
        let end = offset.saturating_add(fragment.len());
        if total_len > self.capacity || end > self.capacity {
            return Reassembly::Overflow {
                declared: total_len.max(end),
                capacity: self.capacity,
            };
        }

        if offset == 0 {
            self.storage.clear();
        }
        if self.storage.len() < end {
            self.storage.resize(end, 0);
        }
        self.storage[offset..end].copy_from_slice(fragment);
        self.filled_len = end;

        if end < total_len {
            return Reassembly::Incomplete;
        }

        let message = self.storage.split_to(end).freeze();
        self.reset();

        match kind {
            FrameKind::Text => Reassembly::Complete(CompletedMessage::Text(message)),
            FrameKind::Close => {
                Reassembly::Complete(CompletedMessage::Close(CloseFrameInfo::from_payload(&message)))
            }
        }
    }
}
