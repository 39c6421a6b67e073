//! Datagram reassembly.
//!
//! The drone splits each encoded picture into datagrams of exactly
//! `max_datagram` bytes. A shorter datagram closes the picture.

/// Result of pushing one datagram into the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembly {
    /// More datagrams are needed.
    Pending,
    /// The accumulated bytes of one picture, ready for decoding.
    Complete(Vec<u8>),
    /// The working buffer exceeded the cap and was dropped (bytes discarded).
    Overflow(usize),
}

/// Accumulates datagrams until an end-of-frame marker arrives.
#[derive(Debug)]
pub struct FrameAssembler {
    max_datagram: usize,
    max_frame_bytes: usize,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(max_datagram: usize, max_frame_bytes: usize) -> Self {
        Self {
            max_datagram,
            max_frame_bytes,
            buffer: Vec::new(),
        }
    }

    pub fn push(&mut self, datagram: &[u8]) -> Assembly {
        self.buffer.extend_from_slice(datagram);

        if self.buffer.len() > self.max_frame_bytes {
            let dropped = self.buffer.len();
            self.buffer.clear();
            return Assembly::Overflow(dropped);
        }

        if datagram.len() < self.max_datagram {
            return Assembly::Complete(std::mem::take(&mut self.buffer));
        }

        Assembly::Pending
    }

    /// Bytes accumulated since the last end-of-frame marker.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
