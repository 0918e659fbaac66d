use std::sync::Mutex;

use tracing::{debug, trace};

use crate::buffer::ByteBuf;

/// Bounded recycling of [ByteBuf] instances.
///
/// The transport side borrows a buffer to hold one inbound frame payload, the session
///  engine returns it right after decoding - buffers are never retained past the
///  dispatch that received them, which keeps the pool from growing without bound.
pub struct BufferPool {
    buf_quantum: usize,
    buffers: Mutex<Vec<ByteBuf>>,
}

impl BufferPool {
    pub fn new(buf_quantum: usize, max_pool_size: usize) -> Self {
        BufferPool {
            buf_quantum,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
        }
    }

    pub fn get(&self) -> ByteBuf {
        {
            let mut buffers = self.buffers.lock().unwrap();
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return buffer;
            }
        }

        debug!("no buffer in pool: creating new buffer");
        ByteBuf::with_quantum(self.buf_quantum)
    }

    pub fn put(&self, mut buffer: ByteBuf) {
        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.capacity() > buffers.len() {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        } else {
            debug!("pool is full: discarding returned buffer");
        }
    }

    #[cfg(test)]
    pub fn pooled_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returned_buffer_is_cleared() {
        let pool = BufferPool::new(16, 4);

        let mut buf = pool.get();
        buf.write_u32(0xDEADBEEF);
        pool.put(buf);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(16, 2);
        pool.put(ByteBuf::with_quantum(16));
        pool.put(ByteBuf::with_quantum(16));
        pool.put(ByteBuf::with_quantum(16));
        assert_eq!(pool.pooled_count(), 2);
    }
}
