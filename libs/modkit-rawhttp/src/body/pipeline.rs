//! Deferred buffer/stream/discard decision for response bodies.
//!
//! The connection pump pushes decoded chunks in as they arrive; the response
//! decides later, exactly once, how it wants them. Until then chunks are queued
//! (with read-ahead capped) and replayed to whichever consumer is chosen.

use super::reader::BodyReader;
use super::shadow::{ShadowBuffer, ShadowState};
use crate::config::{SHADOW_BUFFER_CAPACITY, STREAM_HIGH_WATER_MARK, UNDECIDED_READ_AHEAD};
use crate::error::HttpError;
use crate::runtime::check_not_on_event_loop;
use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

/// Resolves with the complete body once the last chunk has arrived.
pub type BufferResult = oneshot::Receiver<Result<Bytes, HttpError>>;

/// What the connection pump should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// Read more bytes from the connection
    Read,
    /// Nobody wants more bytes right now; wait for demand
    Wait,
    /// Stop reading and drop the connection
    Stop,
}

enum Decision {
    Undecided {
        queue: Vec<Bytes>,
        queued: usize,
    },
    Buffering {
        acc: BytesMut,
        tx: Option<oneshot::Sender<Result<Bytes, HttpError>>>,
    },
    Streaming {
        queue: VecDeque<Bytes>,
        queued: usize,
        closed: bool,
    },
    Discarded {
        drained: usize,
    },
}

impl Decision {
    fn name(&self) -> &'static str {
        match self {
            Self::Undecided { .. } => "undecided",
            Self::Buffering { .. } => "buffer",
            Self::Streaming { .. } => "stream",
            Self::Discarded { .. } => "discard",
        }
    }
}

enum StreamPoll {
    Data(Bytes),
    End,
    Pending,
}

struct Inner {
    decision: Decision,
    /// Last chunk seen
    finished: bool,
    /// Some error was reported by the connection
    failed: bool,
    /// Error not yet handed to a consumer
    failure: Option<HttpError>,
    /// Consumer closed or discarded the body
    closed: bool,
    /// The connection pump is gone
    detached: bool,
    shadow: ShadowBuffer,
    drain_limit: usize,
}

impl Inner {
    fn take_undecided(&mut self) -> Result<Vec<Bytes>, HttpError> {
        match &mut self.decision {
            Decision::Undecided { queue, .. } => Ok(std::mem::take(queue)),
            other => Err(HttpError::AlreadyDecided(other.name())),
        }
    }

    fn demand(&self) -> Demand {
        if self.finished || self.failed {
            return Demand::Stop;
        }
        match &self.decision {
            Decision::Undecided { queued, .. } => {
                if *queued < UNDECIDED_READ_AHEAD {
                    Demand::Read
                } else {
                    Demand::Wait
                }
            }
            Decision::Buffering { tx, .. } => {
                if tx.is_some() {
                    Demand::Read
                } else {
                    Demand::Stop
                }
            }
            Decision::Streaming { queued, closed, .. } => {
                if *closed {
                    Demand::Stop
                } else if *queued < STREAM_HIGH_WATER_MARK {
                    Demand::Read
                } else {
                    Demand::Wait
                }
            }
            Decision::Discarded { drained } => {
                if *drained < self.drain_limit {
                    Demand::Read
                } else {
                    Demand::Stop
                }
            }
        }
    }

    fn poll_stream(&mut self, max: usize) -> Result<StreamPoll, HttpError> {
        let Decision::Streaming {
            queue,
            queued,
            closed,
        } = &mut self.decision
        else {
            return Ok(StreamPoll::End);
        };
        if *closed {
            return Ok(StreamPoll::End);
        }
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        if self.failed {
            return Err(HttpError::BodyUnavailable(
                "body stream already failed".to_owned(),
            ));
        }
        if let Some(front) = queue.front_mut() {
            let take = max.min(front.len());
            let data = front.split_to(take);
            if front.is_empty() {
                queue.pop_front();
            }
            *queued -= take;
            return Ok(StreamPoll::Data(data));
        }
        if self.finished {
            return Ok(StreamPoll::End);
        }
        Ok(StreamPoll::Pending)
    }

    fn shadow_state(&self) -> ShadowState {
        match self.shadow.state() {
            ShadowState::Pending if self.detached => ShadowState::Failed(
                "connection released before the body prefix was captured".to_owned(),
            ),
            state => state,
        }
    }
}

/// Body state machine shared between the connection pump and the response.
pub struct BodyPipeline {
    inner: Mutex<Inner>,
    /// Wakes blocking stream readers
    readable: Condvar,
    /// Wakes async consumers (stream chunks, shadow copy)
    changed: Notify,
    /// Wakes the connection pump
    demand: Notify,
    /// Fired once the pump has nothing left to do, so a pending socket read is abandoned
    cancel: CancellationToken,
}

impl BodyPipeline {
    /// Create an undecided pipeline that drains at most `drain_limit` bytes once discarded.
    pub fn new(drain_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                decision: Decision::Undecided {
                    queue: Vec::new(),
                    queued: 0,
                },
                finished: false,
                failed: false,
                failure: None,
                closed: false,
                detached: false,
                shadow: ShadowBuffer::new(SHADOW_BUFFER_CAPACITY),
                drain_limit,
            }),
            readable: Condvar::new(),
            changed: Notify::new(),
            demand: Notify::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Pipeline for a response that carries no body.
    pub fn empty() -> Arc<Self> {
        let pipeline = Self::new(0);
        pipeline.finish();
        pipeline.detach();
        pipeline
    }

    /// Token the connection pump watches while waiting on the socket.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn wake_consumers(&self) {
        self.readable.notify_all();
        self.changed.notify_waiters();
    }

    // ---- producer side (connection pump) ----

    /// Hand a decoded chunk to the pipeline.
    pub fn push(&self, chunk: Bytes) -> Demand {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !chunk.is_empty() && !inner.finished {
            inner.shadow.push(&chunk);
            match &mut inner.decision {
                Decision::Undecided { queue, queued } => {
                    *queued += chunk.len();
                    queue.push(chunk);
                }
                Decision::Buffering { acc, tx } => {
                    if tx.is_some() {
                        acc.extend_from_slice(&chunk);
                    }
                }
                Decision::Streaming {
                    queue,
                    queued,
                    closed,
                } => {
                    if !*closed {
                        *queued += chunk.len();
                        queue.push_back(chunk);
                    }
                }
                Decision::Discarded { drained } => *drained += chunk.len(),
            }
        }
        let demand = inner.demand();
        drop(guard);
        self.wake_consumers();
        demand
    }

    /// The last chunk has been pushed.
    pub fn finish(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.finished || inner.failed {
            return;
        }
        inner.finished = true;
        inner.shadow.finish();
        if let Decision::Buffering { acc, tx } = &mut inner.decision
            && let Some(tx) = tx.take()
        {
            let body = std::mem::take(acc).freeze();
            tracing::trace!(bytes = body.len(), "buffered response body complete");
            if tx.send(Ok(body)).is_err() {
                tracing::trace!("buffered body receiver dropped");
            }
        }
        drop(guard);
        self.wake_consumers();
    }

    /// The connection failed while the body was being read.
    ///
    /// Before a decision the error is kept and replayed to whichever consumer is
    /// chosen; a second error is attached to the first as suppressed.
    pub fn fail(&self, err: HttpError) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.finished {
            tracing::debug!(error = %err, "ignoring error reported after body completion");
            return;
        }
        inner.shadow.fail(err.to_string());
        let already_failed = inner.failed;
        inner.failed = true;

        match &mut inner.decision {
            Decision::Undecided { .. } | Decision::Streaming { .. } => {
                inner.failure = match inner.failure.take() {
                    Some(first) => Some(first.with_suppressed(err)),
                    None if already_failed => {
                        tracing::debug!(error = %err, "body error after failure was delivered");
                        None
                    }
                    None => Some(err),
                };
            }
            Decision::Buffering { tx, acc } => {
                acc.clear();
                match tx.take() {
                    Some(tx) => {
                        if tx.send(Err(err)).is_err() {
                            tracing::trace!("buffered body receiver dropped");
                        }
                    }
                    None => tracing::debug!(error = %err, "body error after buffering ended"),
                }
            }
            Decision::Discarded { .. } => {
                tracing::debug!(error = %err, "connection error while discarding body");
            }
        }
        drop(guard);
        self.wake_consumers();
    }

    /// Current demand, without waiting.
    pub fn demand(&self) -> Demand {
        self.inner.lock().demand()
    }

    /// Wait until the pump should read again or stop.
    pub async fn wait_for_demand(&self) -> Demand {
        loop {
            let notified = self.demand.notified();
            match self.demand() {
                Demand::Wait => notified.await,
                other => return other,
            }
        }
    }

    /// The connection pump has exited, for whatever reason.
    pub fn detach(&self) {
        let mut guard = self.inner.lock();
        guard.detached = true;
        let interrupted = !guard.finished && !guard.failed && !guard.closed;
        drop(guard);
        if interrupted {
            self.fail(HttpError::Transport(
                "connection closed before the body was complete".into(),
            ));
        } else {
            self.wake_consumers();
        }
    }

    // ---- consumer side (response) ----

    /// Whether a stream reader owns the body.
    pub fn is_streaming(&self) -> bool {
        matches!(self.inner.lock().decision, Decision::Streaming { .. })
    }

    /// Name of the current decision (`undecided`, `buffer`, `stream`, `discard`).
    pub fn decision_name(&self) -> &'static str {
        self.inner.lock().decision.name()
    }

    /// Decide to buffer the whole body.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::AlreadyDecided` if a decision was already made.
    pub fn as_buffer(&self) -> Result<BufferResult, HttpError> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let queue = inner.take_undecided()?;

        let tx = if let Some(err) = inner.failure.take() {
            drop(queue);
            if tx.send(Err(err)).is_err() {
                tracing::trace!("buffered body receiver dropped");
            }
            None
        } else if inner.finished {
            if tx.send(Ok(concat(&queue).freeze())).is_err() {
                tracing::trace!("buffered body receiver dropped");
            }
            None
        } else {
            inner.decision = Decision::Buffering {
                acc: concat(&queue),
                tx: Some(tx),
            };
            drop(guard);
            self.demand.notify_one();
            return Ok(rx);
        };

        inner.decision = Decision::Buffering {
            acc: BytesMut::new(),
            tx,
        };
        drop(guard);
        self.demand.notify_one();
        Ok(rx)
    }

    /// Decide to stream the body; queued chunks are replayed first.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::AlreadyDecided` if a decision was already made.
    pub fn as_stream(self: &Arc<Self>) -> Result<BodyReader, HttpError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let queue = inner.take_undecided()?;

        let (queue, queued) = if inner.failure.is_some() {
            (VecDeque::new(), 0)
        } else {
            let queued = queue.iter().map(Bytes::len).sum();
            (VecDeque::from(queue), queued)
        };
        inner.decision = Decision::Streaming {
            queue,
            queued,
            closed: false,
        };
        drop(guard);
        self.demand.notify_one();
        Ok(BodyReader::new(Arc::clone(self)))
    }

    /// Decide to drop the body; the connection is drained up to the drain limit.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::AlreadyDecided` if a decision was already made.
    pub fn discard(&self) -> Result<(), HttpError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let queue = inner.take_undecided()?;
        Self::discard_locked(inner, &queue);
        drop(guard);
        self.demand.notify_one();
        self.wake_consumers();
        Ok(())
    }

    fn discard_locked(inner: &mut Inner, queue: &[Bytes]) {
        if let Some(err) = inner.failure.take() {
            tracing::debug!(error = %err, "dropping body error on discard");
        }
        inner.closed = true;
        inner.decision = Decision::Discarded {
            drained: queue.iter().map(Bytes::len).sum(),
        };
    }

    /// Release the body from the consumer side. Safe to call repeatedly.
    ///
    /// Undecided bodies are discarded, streams read end-of-data from now on, and a
    /// pending buffer future is cancelled.
    pub fn close(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match &mut inner.decision {
            Decision::Undecided { queue, .. } => {
                let queue = std::mem::take(queue);
                Self::discard_locked(inner, &queue);
            }
            Decision::Streaming {
                queue,
                queued,
                closed,
            } => {
                *closed = true;
                queue.clear();
                *queued = 0;
                inner.closed = true;
            }
            Decision::Buffering { tx, acc } => {
                if tx.take().is_some() {
                    tracing::debug!("cancelled pending buffered body");
                }
                acc.clear();
                inner.closed = true;
            }
            Decision::Discarded { .. } => {}
        }
        let stop = inner.demand() == Demand::Stop;
        drop(guard);
        if stop {
            self.cancel.cancel();
        }
        self.demand.notify_one();
        self.wake_consumers();
    }

    /// Give up on the body without draining it; the pump drops the connection.
    pub fn abort(&self) {
        self.close();
        self.cancel.cancel();
    }

    /// Blocking read for streaming consumers.
    ///
    /// # Errors
    ///
    /// Returns the connection error, or `HttpError::BlockingReadOnEventLoop` when
    /// a wait would park the I/O driver thread.
    pub fn read_blocking(&self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = self.inner.lock();
        loop {
            match guard.poll_stream(buf.len())? {
                StreamPoll::Data(data) => {
                    drop(guard);
                    buf[..data.len()].copy_from_slice(&data);
                    self.demand.notify_one();
                    return Ok(data.len());
                }
                StreamPoll::End => return Ok(0),
                StreamPoll::Pending => {
                    check_not_on_event_loop()?;
                    self.readable.wait(&mut guard);
                }
            }
        }
    }

    /// Next chunk for async streaming consumers; `None` at end of body.
    ///
    /// # Errors
    ///
    /// Returns the connection error that ended the body.
    pub async fn next_chunk(&self) -> Result<Option<Bytes>, HttpError> {
        loop {
            let notified = self.changed.notified();
            let poll = self.inner.lock().poll_stream(usize::MAX)?;
            match poll {
                StreamPoll::Data(data) => {
                    self.demand.notify_one();
                    return Ok(Some(data));
                }
                StreamPoll::End => return Ok(None),
                StreamPoll::Pending => notified.await,
            }
        }
    }

    /// Snapshot of the shadow copy.
    pub fn shadow_state(&self) -> ShadowState {
        self.inner.lock().shadow_state()
    }

    /// Wait for the shadow copy to become ready.
    ///
    /// Returns the captured bytes and whether bytes were dropped for lack of room.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::BodyUnavailable` if the connection failed or was
    /// released before the copy became ready.
    pub async fn shadow(&self) -> Result<(Bytes, bool), HttpError> {
        loop {
            let notified = self.changed.notified();
            match self.shadow_state() {
                ShadowState::Ready { bytes, overflowed } => return Ok((bytes, overflowed)),
                ShadowState::Failed(message) => return Err(HttpError::BodyUnavailable(message)),
                ShadowState::Pending => notified.await,
            }
        }
    }
}

fn concat(chunks: &[Bytes]) -> BytesMut {
    let mut acc = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        acc.extend_from_slice(chunk);
    }
    acc
}
