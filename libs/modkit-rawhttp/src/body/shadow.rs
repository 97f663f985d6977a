use bytes::{Bytes, BytesMut};

/// Bounded copy of the first bytes of a response body.
///
/// Mirrors every chunk until it is full. When the primary consumer of a body
/// fails (for example a typed decode after a streaming read), the shadow still
/// holds a short error message for diagnostics.
#[derive(Debug)]
pub struct ShadowBuffer {
    data: BytesMut,
    capacity: usize,
    overflowed: bool,
    complete: bool,
    failure: Option<String>,
}

/// What the shadow copy can currently offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowState {
    /// More bytes may still arrive
    Pending,
    /// Full or complete. `overflowed` is set when bytes were dropped.
    Ready { bytes: Bytes, overflowed: bool },
    /// The connection failed before the shadow copy became ready
    Failed(String),
}

impl ShadowBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            overflowed: false,
            complete: false,
            failure: None,
        }
    }

    /// Mirror a chunk, copying only the prefix that still fits.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.overflowed {
            return;
        }
        let room = self.capacity - self.data.len();
        let take = room.min(chunk.len());
        if take < chunk.len() {
            self.overflowed = true;
        }
        self.data.extend_from_slice(&chunk[..take]);
    }

    /// The last chunk has arrived.
    pub fn finish(&mut self) {
        self.complete = true;
    }

    pub fn fail(&mut self, message: String) {
        if !self.is_ready() && self.failure.is_none() {
            self.failure = Some(message);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[cfg(test)]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn is_ready(&self) -> bool {
        self.complete || self.data.len() >= self.capacity
    }

    pub fn state(&self) -> ShadowState {
        if self.is_ready() {
            return ShadowState::Ready {
                bytes: Bytes::copy_from_slice(&self.data),
                overflowed: self.overflowed,
            };
        }
        match &self.failure {
            Some(message) => ShadowState::Failed(message.clone()),
            None => ShadowState::Pending,
        }
    }
}
