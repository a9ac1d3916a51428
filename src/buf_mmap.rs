use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::buf::{Buf, BufError};
use crate::buf_pool::PoolInner;

/// A packet buffer living in a slot of a pool's mapped area.
///
/// The handle is move-only. Whoever holds it owns the slot: the application, a device queue,
/// or (once returned) the pool. It goes back to the pool that issued it through
/// `BufPool::free`, `BufPool::put` or by being dropped.
pub struct BufMmap {
    // None once the slot has been handed back to the pool.
    pool: Option<Arc<PoolInner>>,
    ptr: NonNull<u8>,
    index: u32,
    capacity: usize,
    base_headroom: usize,
    head: usize,
    len: usize,
}

// The slot behind `ptr` is owned exclusively by this handle.
unsafe impl Send for BufMmap {}

impl BufMmap {
    pub(crate) fn new(
        pool: Arc<PoolInner>,
        ptr: NonNull<u8>,
        index: u32,
        capacity: usize,
        headroom: usize,
    ) -> BufMmap {
        BufMmap {
            pool: Some(pool),
            ptr,
            index,
            capacity,
            base_headroom: headroom,
            head: headroom,
            len: 0,
        }
    }

    /// Index of the slot in the pool's area
    pub fn get_index(&self) -> u32 {
        self.index
    }

    /// Detach from the pool without running Drop's release path. Returns the origin pool.
    pub(crate) fn detach(mut self) -> (Arc<PoolInner>, u32) {
        let index = self.index;
        // Only ever None after detach, which consumes the handle.
        match self.pool.take() {
            Some(pool) => (pool, index),
            None => unreachable!("buffer detached twice"),
        }
    }

    pub(crate) fn is_from(&self, pool: &Arc<PoolInner>) -> bool {
        match &self.pool {
            Some(p) => Arc::ptr_eq(p, pool),
            None => false,
        }
    }

    #[inline]
    fn region(&self) -> &[u8] {
        // The slot is capacity bytes long and the area outlives the handle through `pool`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    #[inline]
    fn region_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl Buf for BufMmap {
    fn get_data(&self) -> &[u8] {
        &self.region()[self.head..self.head + self.len]
    }

    fn get_data_mut(&mut self) -> &mut [u8] {
        let (head, len) = (self.head, self.len);
        &mut self.region_mut()[head..head + len]
    }

    fn get_capacity(&self) -> usize {
        self.capacity
    }

    fn get_len(&self) -> usize {
        self.len
    }

    fn get_headroom(&self) -> usize {
        self.head
    }

    fn append(&mut self, data: &[u8]) -> Result<(), BufError> {
        let available = self.get_tailroom();
        if data.len() > available {
            return Err(BufError::InsufficientTailroom {
                requested: data.len(),
                available,
            });
        }

        let start = self.head + self.len;
        self.region_mut()[start..start + data.len()].copy_from_slice(data);
        self.len += data.len();

        Ok(())
    }

    fn prepend(&mut self, data: &[u8]) -> Result<(), BufError> {
        if data.len() > self.head {
            return Err(BufError::InsufficientHeadroom {
                requested: data.len(),
                available: self.head,
            });
        }

        let end = self.head;
        let start = end - data.len();
        self.region_mut()[start..end].copy_from_slice(data);
        self.head = start;
        self.len += data.len();

        Ok(())
    }

    fn reset(&mut self) {
        self.head = self.base_headroom;
        self.len = 0;
    }
}

impl fmt::Debug for BufMmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufMmap")
            .field("index", &self.index)
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for BufMmap {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(self.index);
        }
    }
}
