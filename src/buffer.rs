//! Pooled memory blocks for pipe buffers.
//!
//! The pool hands out fixed-size zero-initialized blocks and takes their
//! storage back when a [`Block`] is dropped, so memory crossing the pipe
//! boundary is recycled without the producer and consumer sharing lifetimes.
//! One pool is meant to be shared by every connection of a server.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Default size of a pooled block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Blocks kept on the free list before further returns are simply freed.
const MAX_POOLED_BLOCKS: usize = 256;

/// A contiguous memory block with independent read and write cursors.
///
/// `read..written` is committed, unconsumed data; `written..capacity` is
/// writable space. Dropping the block returns its storage to the pool it
/// was checked out from, unless it was an oversized one-off allocation.
pub struct Block {
    data: Option<Box<[u8]>>,
    read: usize,
    written: usize,
    pool: Arc<PoolInner>,
}

impl Block {
    /// Number of committed, unconsumed bytes.
    pub fn len(&self) -> usize {
        self.written - self.read
    }

    /// True if no committed bytes remain.
    pub fn is_empty(&self) -> bool {
        self.written == self.read
    }

    /// Committed bytes that have not been consumed yet.
    pub fn unread(&self) -> &[u8] {
        &self.data()[self.read..self.written]
    }

    /// Writable space past the committed region.
    pub fn writable_mut(&mut self) -> &mut [u8] {
        let written = self.written;
        &mut self.data_mut()[written..]
    }

    /// Number of writable bytes left in the block.
    pub fn spare(&self) -> usize {
        self.data().len() - self.written
    }

    /// Mark `n` freshly written bytes as committed.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the writable space.
    pub fn advance_write(&mut self, n: usize) {
        assert!(n <= self.spare(), "commit past the reserved region");
        self.written += n;
    }

    /// Mark `n` committed bytes as consumed.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the committed region.
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.len(), "consume past the committed region");
        self.read += n;
    }

    fn data(&self) -> &[u8] {
        // Storage is only vacated in Drop.
        self.data.as_ref().expect("block storage present")
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_mut().expect("block storage present")
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.recycle(data);
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.data().len())
            .field("read", &self.read)
            .field("written", &self.written)
            .finish()
    }
}

/// A shared, thread-safe pool of fixed-size buffer blocks.
///
/// Cloning the handle is cheap and shares the underlying free list.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    block_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BlockPool {
    /// Create a pool with the default block size.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create a pool handing out blocks of `block_size` bytes.
    pub fn with_block_size(block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        BlockPool { inner: Arc::new(PoolInner { block_size, free: Mutex::new(Vec::new()) }) }
    }

    /// Size of the blocks this pool recycles.
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Check out a block with at least `min` bytes of writable space.
    ///
    /// Requests larger than the pool's block size get a one-off allocation
    /// that is not recycled on drop.
    pub fn checkout(&self, min: usize) -> Block {
        let data = if min <= self.inner.block_size {
            let recycled = {
                let mut free = self.inner.lock_free();
                free.pop()
            };
            recycled.unwrap_or_else(|| zeroed(self.inner.block_size))
        } else {
            zeroed(min)
        };
        Block { data: Some(data), read: 0, written: 0, pool: Arc::clone(&self.inner) }
    }

    /// Number of blocks currently sitting on the free list.
    pub fn pooled(&self) -> usize {
        self.inner.lock_free().len()
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.inner.block_size)
            .field("pooled", &self.pooled())
            .finish()
    }
}

impl PoolInner {
    fn recycle(&self, mut data: Box<[u8]>) {
        if data.len() != self.block_size {
            return;
        }
        data.fill(0);
        let mut free = self.lock_free();
        if free.len() < MAX_POOLED_BLOCKS {
            free.push(data);
        }
    }

    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<Box<[u8]>>> {
        // Poisoning only happens if an allocation panicked mid-push.
        self.free.lock().expect("block pool lock poisoned")
    }
}

fn zeroed(len: usize) -> Box<[u8]> {
    vec![0u8; len].into_boxed_slice()
}
