//! Two-way split of a blocking body source, used by request copies.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

const SPLIT_CHUNK: usize = 8 * 1024;

/// How two readers of one split source share it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackpressureMode {
    /// The faster reader pulls freely; data is kept for the slower one.
    #[default]
    Fastest,
    /// A reader may be at most one chunk ahead of a live peer.
    ///
    /// Both readers must be consumed concurrently (from different threads),
    /// otherwise the leading one waits forever for its peer.
    Slowest,
}

struct SplitState {
    /// `None` while one of the readers is pulling from it
    source: Option<Box<dyn Read + Send>>,
    eof: bool,
    error: Option<(io::ErrorKind, String)>,
    backlog: [VecDeque<Bytes>; 2],
    alive: [bool; 2],
}

struct Shared {
    state: Mutex<SplitState>,
    changed: Condvar,
    mode: BackpressureMode,
}

/// One side of a split body source. Both sides yield the full byte sequence.
pub struct SplitReader {
    shared: Arc<Shared>,
    index: usize,
}

/// Split `source` into two readers that each see every byte.
pub fn split(source: Box<dyn Read + Send>, mode: BackpressureMode) -> (SplitReader, SplitReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(SplitState {
            source: Some(source),
            eof: false,
            error: None,
            backlog: [VecDeque::new(), VecDeque::new()],
            alive: [true, true],
        }),
        changed: Condvar::new(),
        mode,
    });
    (
        SplitReader {
            shared: Arc::clone(&shared),
            index: 0,
        },
        SplitReader { shared, index: 1 },
    )
}

fn serve(queue: &mut VecDeque<Bytes>, buf: &mut [u8]) -> Option<usize> {
    let front = queue.front_mut()?;
    let n = buf.len().min(front.len());
    buf[..n].copy_from_slice(&front.split_to(n));
    if front.is_empty() {
        queue.pop_front();
    }
    Some(n)
}

impl Read for SplitReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let me = self.index;
        let peer = 1 - me;
        let mut state = self.shared.state.lock();

        loop {
            if let Some(n) = serve(&mut state.backlog[me], buf) {
                drop(state);
                self.shared.changed.notify_all();
                return Ok(n);
            }
            if state.eof {
                return Ok(0);
            }
            if let Some((kind, message)) = &state.error {
                return Err(io::Error::new(*kind, message.clone()));
            }

            let peer_lagging = state.alive[peer] && !state.backlog[peer].is_empty();
            if self.shared.mode == BackpressureMode::Slowest && peer_lagging {
                self.shared.changed.wait(&mut state);
                continue;
            }

            let Some(mut source) = state.source.take() else {
                self.shared.changed.wait(&mut state);
                continue;
            };

            let mut chunk = vec![0u8; SPLIT_CHUNK];
            let outcome = parking_lot::MutexGuard::unlocked(&mut state, || source.read(&mut chunk));
            state.source = Some(source);

            match outcome {
                Ok(0) => state.eof = true,
                Ok(n) => {
                    chunk.truncate(n);
                    let chunk = Bytes::from(chunk);
                    if state.alive[peer] {
                        state.backlog[peer].push_back(chunk.clone());
                    }
                    state.backlog[me].push_back(chunk);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => state.error = Some((err.kind(), err.to_string())),
            }
            self.shared.changed.notify_all();
        }
    }
}

impl Drop for SplitReader {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.alive[self.index] = false;
        state.backlog[self.index].clear();
        drop(state);
        self.shared.changed.notify_all();
    }
}

impl std::fmt::Debug for SplitReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitReader")
            .field("index", &self.index)
            .field("mode", &self.shared.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn payload() -> Vec<u8> {
        (0..50_000u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_fastest_readers_sequentially_see_everything() {
        let (mut a, mut b) = split(Box::new(Cursor::new(payload())), BackpressureMode::Fastest);

        let mut first = Vec::new();
        a.read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        b.read_to_end(&mut second).unwrap();

        assert_eq!(first, payload());
        assert_eq!(second, payload());
    }

    #[test]
    fn test_slowest_readers_concurrently_see_everything() {
        let (mut a, mut b) = split(Box::new(Cursor::new(payload())), BackpressureMode::Slowest);

        let other = std::thread::spawn(move || {
            let mut out = Vec::new();
            b.read_to_end(&mut out).unwrap();
            out
        });
        let mut mine = Vec::new();
        a.read_to_end(&mut mine).unwrap();

        assert_eq!(mine, payload());
        assert_eq!(other.join().unwrap(), payload());
    }

    #[test]
    fn test_slowest_does_not_wait_for_dropped_peer() {
        let (mut a, b) = split(Box::new(Cursor::new(payload())), BackpressureMode::Slowest);
        drop(b);

        let mut out = Vec::new();
        a.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), payload().len());
    }

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "source gone"))
        }
    }

    #[test]
    fn test_source_error_reaches_both_readers() {
        let (mut a, mut b) = split(Box::new(Failing), BackpressureMode::Fastest);
        let mut buf = [0u8; 4];

        assert_eq!(a.read(&mut buf).unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(b.read(&mut buf).unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
