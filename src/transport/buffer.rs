//! Reusable serialization buffer pool.
//!
//! Design Note from spec.md §9: model the buffer lifecycle with an
//! explicit state atom rather than implicit ownership, since buffers
//! are returned to the pool from multiple call sites (successful
//! send, failed send, `abort()`). Each checked-out [`PooledBuffer`]
//! tracks its own state and returns itself to the pool's free-list on
//! `Drop`, regardless of which of those sites triggered it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

/// A buffer's position in its lifecycle, per spec.md §4.1: "available
/// → fillingUp → transmitting → available".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferState {
    Available = 0,
    FillingUp = 1,
    Transmitting = 2,
}

impl BufferState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BufferState::Available,
            1 => BufferState::FillingUp,
            _ => BufferState::Transmitting,
        }
    }
}

/// A single buffer checked out of a [`BufferPool`]. Returns its
/// backing storage to the pool's free-list when dropped.
pub struct PooledBuffer {
    data: Vec<u8>,
    state: Arc<AtomicU8>,
    capacity: usize,
    returner: Sender<Vec<u8>>,
}

impl PooledBuffer {
    pub fn state(&self) -> BufferState {
        BufferState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Called by the sender-side code once it starts writing into the
    /// buffer.
    pub fn mark_filling_up(&self) {
        self.state.store(BufferState::FillingUp as u8, Ordering::Release);
    }

    /// Called once the buffer has been handed to the transport for the
    /// actual raw write/send.
    pub fn mark_transmitting(&self) {
        self.state
            .store(BufferState::Transmitting as u8, Ordering::Release);
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.state.store(BufferState::Available as u8, Ordering::Release);
        let mut data = std::mem::take(&mut self.data);
        data.clear();
        // Release is non-blocking (spec.md §4.1): a full channel here
        // would mean more buffers are in flight than the pool ever
        // handed out, which cannot happen.
        let _ = self.returner.try_send(data);
    }
}

/// A bounded set of reusable byte buffers. Acquisition blocks when the
/// pool is exhausted; release is non-blocking. Size and per-buffer
/// capacity are configured from the `MULTIO_*_POOL_SIZE` /
/// `MULTIO_*_BUFFER_SIZE` environment variables (spec.md §6) via
/// [`crate::config::env`].
pub struct BufferPool {
    free_rx: Receiver<Vec<u8>>,
    free_tx: Sender<Vec<u8>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(pool_size: usize, buffer_size: usize) -> Self {
        let (tx, rx) = channel::bounded(pool_size);
        for _ in 0..pool_size {
            tx.send(Vec::with_capacity(buffer_size))
                .expect("freshly created channel has capacity for its own fill");
        }
        Self {
            free_rx: rx,
            free_tx: tx,
            buffer_size,
        }
    }

    /// Block until a buffer is available.
    pub fn acquire(&self) -> PooledBuffer {
        let data = self
            .free_rx
            .recv()
            .expect("pool sender is held by this same struct and never dropped first");
        PooledBuffer {
            data,
            state: Arc::new(AtomicU8::new(BufferState::Available as u8)),
            capacity: self.buffer_size,
            returner: self.free_tx.clone(),
        }
    }

    /// Like [`BufferPool::acquire`] but gives up after `timeout`,
    /// surfacing backpressure instead of blocking indefinitely.
    pub fn try_acquire(&self, timeout: Duration) -> Option<PooledBuffer> {
        match self.free_rx.recv_timeout(timeout) {
            Ok(data) => Some(PooledBuffer {
                data,
                state: Arc::new(AtomicU8::new(BufferState::Available as u8)),
                capacity: self.buffer_size,
                returner: self.free_tx.clone(),
            }),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_cycles_through_states() {
        let pool = BufferPool::new(1, 1024);
        let mut buf = pool.acquire();
        assert_eq!(buf.state(), BufferState::Available);
        buf.mark_filling_up();
        assert_eq!(buf.state(), BufferState::FillingUp);
        buf.as_mut_vec().extend_from_slice(b"hello");
        buf.mark_transmitting();
        assert_eq!(buf.state(), BufferState::Transmitting);
        drop(buf);

        // Buffer is back in the pool, cleared, and acquirable again.
        let buf2 = pool.acquire();
        assert_eq!(buf2.state(), BufferState::Available);
        assert!(buf2.as_slice().is_empty());
    }

    #[test]
    fn acquire_blocks_when_pool_is_exhausted() {
        let pool = BufferPool::new(1, 16);
        let _held = pool.acquire();
        assert!(pool.try_acquire(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn release_makes_buffer_available_again() {
        let pool = BufferPool::new(1, 16);
        {
            let _held = pool.acquire();
        }
        assert!(pool.try_acquire(Duration::from_millis(20)).is_some());
    }
}
