// ABOUTME: Process-wide scratch buffer pool backing the frame write path
// ABOUTME: Grounded on the original source's sync.Pool-of-buffers (buffer.go/message.go)

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

const DEFAULT_SCRATCH_CAPACITY: usize = 4 * 1024;
const MAX_POOLED: usize = 256;

/// Recycles scratch buffers used to assemble outgoing frames.
///
/// A buffer obtained via [`BufferPool::acquire`] is exclusively owned by
/// the caller until it is dropped, at which point it is returned to the
/// pool automatically. There is no way to release a [`PooledBuf`] twice:
/// ownership is enforced by the type system rather than caller discipline.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<Mutex<Vec<BytesMut>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn acquire(&self) -> PooledBuf {
        let buf = self
            .inner
            .lock()
            .expect("buffer pool mutex poisoned")
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_SCRATCH_CAPACITY));
        PooledBuf {
            buf: Some(buf),
            pool: self.inner.clone(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned scratch buffer borrowed from a [`BufferPool`]. Returned to the
/// pool on drop, capped at [`MAX_POOLED`] so a burst of oversized frames
/// does not pin arbitrarily large buffers in memory indefinitely.
pub struct PooledBuf {
    buf: Option<BytesMut>,
    pool: Arc<Mutex<Vec<BytesMut>>>,
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            let mut pool = self.pool.lock().expect("buffer pool mutex poisoned");
            if pool.len() < MAX_POOLED {
                pool.push(buf);
            }
        }
    }
}

impl Deref for PooledBuf {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_buffer_is_recycled_on_drop() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"scratch");
        }
        assert_eq!(pool.inner.lock().unwrap().len(), 1);
        let buf = pool.acquire();
        assert!(buf.is_empty(), "recycled buffer must come back cleared");
    }

    #[test]
    fn pool_caps_retained_buffers() {
        let pool = BufferPool::new();
        let mut held = Vec::new();
        for _ in 0..(MAX_POOLED + 10) {
            held.push(pool.acquire());
        }
        drop(held);
        assert!(pool.inner.lock().unwrap().len() <= MAX_POOLED);
    }
}
