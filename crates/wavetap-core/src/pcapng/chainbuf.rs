//! Bounded blocking chunk queue between the logger and its consumer.
//!
//! The logger produces finished pcap-ng blocks; whoever drains the stream
//! (a file writer, an HTTP response, a rotation manager) consumes them.
//! When the backlog limit is reached the producer blocks, which doubles as
//! the backpressure/rotation signal for the consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct ChainBufState {
    chunks: VecDeque<Vec<u8>>,
    size: usize,
    running: bool,
}

/// Bounded byte-chunk queue with blocking producers and consumers.
pub struct ChainBuf {
    state: Mutex<ChainBufState>,
    space_cv: Condvar,
    data_cv: Condvar,
    max_backlog: usize,
}

impl ChainBuf {
    /// Create a queue that blocks producers once `max_backlog` bytes are
    /// pending.
    pub fn new(max_backlog: usize) -> Self {
        Self {
            state: Mutex::new(ChainBufState {
                chunks: VecDeque::new(),
                size: 0,
                running: true,
            }),
            space_cv: Condvar::new(),
            data_cv: Condvar::new(),
            max_backlog,
        }
    }

    /// Bytes currently queued.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().size
    }

    pub fn running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    /// Queue a chunk, blocking while the backlog is full.  Returns false
    /// when the queue was cancelled before space became available.
    pub fn put(&self, chunk: Vec<u8>) -> bool {
        let mut state = self.state.lock().unwrap();

        while state.running && state.size + chunk.len() > self.max_backlog {
            state = self.space_cv.wait(state).unwrap();
        }

        if !state.running {
            return false;
        }

        state.size += chunk.len();
        state.chunks.push_back(chunk);
        self.data_cv.notify_one();
        true
    }

    /// Take the next chunk, blocking until one is queued.  Returns `None`
    /// once the queue is cancelled and drained.
    pub fn take(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(chunk) = state.chunks.pop_front() {
                state.size -= chunk.len();
                self.space_cv.notify_one();
                return Some(chunk);
            }
            if !state.running {
                return None;
            }
            state = self.data_cv.wait(state).unwrap();
        }
    }

    /// Take the next chunk without blocking.
    pub fn try_take(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let chunk = state.chunks.pop_front()?;
        state.size -= chunk.len();
        self.space_cv.notify_one();
        Some(chunk)
    }

    /// Stop the stream: producers fail fast, consumers drain what is left.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        self.space_cv.notify_all();
        self.data_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::ChainBuf;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn put_take_round_trip() {
        let buf = ChainBuf::new(1024);
        assert!(buf.put(vec![1, 2, 3]));
        assert_eq!(buf.size(), 3);
        assert_eq!(buf.take(), Some(vec![1, 2, 3]));
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.try_take(), None);
    }

    #[test]
    fn full_queue_blocks_until_drained() {
        let buf = Arc::new(ChainBuf::new(8));
        assert!(buf.put(vec![0u8; 8]));

        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.put(vec![1u8; 8]))
        };

        // The producer cannot finish until we drain.
        thread::sleep(Duration::from_millis(20));
        assert!(!producer.is_finished());

        assert_eq!(buf.take(), Some(vec![0u8; 8]));
        assert!(producer.join().unwrap());
        assert_eq!(buf.take(), Some(vec![1u8; 8]));
    }

    #[test]
    fn cancel_unblocks_producers_and_drains_consumers() {
        let buf = Arc::new(ChainBuf::new(4));
        assert!(buf.put(vec![9u8; 4]));

        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.put(vec![7u8; 4]))
        };

        thread::sleep(Duration::from_millis(10));
        buf.cancel();
        assert!(!producer.join().unwrap());

        // Existing data is still drainable, then the stream ends.
        assert_eq!(buf.take(), Some(vec![9u8; 4]));
        assert_eq!(buf.take(), None);
    }
}
