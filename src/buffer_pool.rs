//! Lock-free pool of frame buffers for coalesced datagram assembly

use crate::packet::constants::MAX_DATAGRAM_PAYLOAD;
use bytes::BytesMut;
use std::sync::LazyLock;

/// Lock-free buffer pool using crossbeam-queue
pub struct BufferPool {
    pool: crossbeam_queue::ArrayQueue<BytesMut>,
    buffer_size: usize,
    hits: std::sync::atomic::AtomicUsize,
}

impl BufferPool {
    /// Create a new buffer pool
    pub fn new(max_size: usize, buffer_size: usize) -> Self {
        Self {
            pool: crossbeam_queue::ArrayQueue::new(max_size),
            buffer_size,
            hits: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Get a buffer from the pool (lock-free)
    pub fn try_get(&self) -> BytesMut {
        match self.pool.pop() {
            Some(buf) => {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                buf
            }
            None => BytesMut::with_capacity(self.buffer_size),
        }
    }

    /// Return a buffer to the pool (lock-free)
    pub fn try_put(&self, mut buf: BytesMut) {
        // Only keep buffers that still have a frame-sized capacity.
        if buf.capacity() >= self.buffer_size {
            buf.clear();
            let _ = self.pool.push(buf); // Ignore if full
        }
    }

    /// Get pool statistics (hits, current_size)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(std::sync::atomic::Ordering::Relaxed),
            self.pool.len(),
        )
    }
}

static FRAME_POOL: LazyLock<BufferPool> =
    LazyLock::new(|| BufferPool::new(64, MAX_DATAGRAM_PAYLOAD));

/// Get a frame-sized buffer from the global pool (non-blocking)
pub fn try_get_frame() -> BytesMut {
    FRAME_POOL.try_get()
}

/// Return a frame buffer to the global pool (non-blocking)
pub fn try_put_frame(buf: BytesMut) {
    FRAME_POOL.try_put(buf);
}
