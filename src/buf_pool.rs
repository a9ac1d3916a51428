use std::cmp::min;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::buf_mmap::BufMmap;
use crate::mmap_area::{MmapArea, MmapAreaOptions, MmapError};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool capacity must be non-zero")]
    ZeroCapacity,

    #[error("cache size {cache_size} exceeds pool capacity {capacity}")]
    CacheTooLarge { cache_size: usize, capacity: usize },

    #[error("pool capacity {0} exceeds the maximum number of buffers")]
    TooManyBuffers(usize),

    #[error("headroom {headroom} does not fit in {element_size} byte buffers")]
    HeadroomTooLarge {
        headroom: usize,
        element_size: usize,
    },

    #[error("cannot map buffer area: {0}")]
    Mmap(#[from] MmapError),

    #[error("pool exhausted")]
    Exhausted,

    #[error("{issued} buffers still outstanding")]
    BuffersOutstanding { issued: usize },
}

impl PoolError {
    /// True for the errors `create` can return
    pub fn is_creation_failure(&self) -> bool {
        !matches!(
            self,
            PoolError::Exhausted | PoolError::BuffersOutstanding { .. }
        )
    }
}

/// Configuration options for BufPool
#[derive(Copy, Clone, Debug, Default)]
pub struct PoolOptions {
    /// Bytes reserved in front of the payload of every freshly allocated buffer
    pub headroom: usize,

    /// Back the area with huge pages
    pub huge_tlb: bool,
}

/// State shared by every handle to a pool and every buffer it issued.
pub(crate) struct PoolInner {
    name: String,
    area: MmapArea,
    capacity: usize,
    cache_size: usize,
    headroom: usize,
    free: Mutex<Vec<u32>>,
    alloc_failures: AtomicU64,
}

impl PoolInner {
    pub(crate) fn release(&self, index: u32) {
        self.free.lock().push(index);
    }
}

/// BufPool is a fixed-capacity arena of equally sized packet buffers.
///
/// Cloning the pool yields another handle to the same arena. The arena is unmapped once the
/// last handle and the last issued buffer are gone, so a buffer can never outlive its memory.
///
/// `cache_size` is recorded and validated against the capacity but there is no per-context
/// cache: every alloc and free goes through one lock.
#[derive(Clone)]
pub struct BufPool {
    inner: Arc<PoolInner>,
}

impl BufPool {
    /// Create a pool of `capacity` buffers of `element_size` bytes with no headroom.
    pub fn create(
        capacity: usize,
        cache_size: usize,
        element_size: usize,
    ) -> Result<BufPool, PoolError> {
        BufPool::create_with(
            "pool",
            capacity,
            cache_size,
            element_size,
            PoolOptions::default(),
        )
    }

    /// Create a pool. All memory is mapped up front.
    ///
    /// # Arguments
    ///
    /// * name: Used in diagnostics
    /// * capacity: The number of buffers
    /// * cache_size: Fast-path reservation hint, must not exceed capacity
    /// * element_size: The length of each buffer
    /// * options: Configuration options
    pub fn create_with(
        name: &str,
        capacity: usize,
        cache_size: usize,
        element_size: usize,
        options: PoolOptions,
    ) -> Result<BufPool, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        if cache_size > capacity {
            return Err(PoolError::CacheTooLarge {
                cache_size,
                capacity,
            });
        }
        if capacity > u32::MAX as usize {
            return Err(PoolError::TooManyBuffers(capacity));
        }
        if options.headroom > element_size {
            return Err(PoolError::HeadroomTooLarge {
                headroom: options.headroom,
                element_size,
            });
        }

        let area = MmapArea::new(
            capacity,
            element_size,
            MmapAreaOptions {
                huge_tlb: options.huge_tlb,
            },
        )?;

        // Reversed so that the lowest slots are handed out first.
        let free: Vec<u32> = (0..capacity as u32).rev().collect();

        debug!(
            name,
            capacity, cache_size, element_size, headroom = options.headroom, "created pool"
        );

        Ok(BufPool {
            inner: Arc::new(PoolInner {
                name: name.to_string(),
                area,
                capacity,
                cache_size,
                headroom: options.headroom,
                free: Mutex::new(free),
                alloc_failures: AtomicU64::new(0),
            }),
        })
    }

    #[inline]
    fn make_buf(&self, index: u32) -> BufMmap {
        let ptr = self.inner.area.buf_ptr(index as usize);
        BufMmap::new(
            self.inner.clone(),
            ptr,
            index,
            self.inner.area.get_buf_len(),
            self.inner.headroom,
        )
    }

    /// Take one free buffer. Never blocks; an empty pool is reported as `Exhausted`.
    #[inline]
    pub fn alloc(&self) -> Result<BufMmap, PoolError> {
        let index = self.inner.free.lock().pop();
        match index {
            Some(index) => Ok(self.make_buf(index)),
            None => {
                self.inner.alloc_failures.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::Exhausted)
            }
        }
    }

    /// Move up to `num` free buffers into `bufs`. Returns how many were moved; fewer than `num`
    /// means the pool ran dry.
    #[inline]
    pub fn get(&self, bufs: &mut Vec<BufMmap>, num: usize) -> usize {
        let mut free = self.inner.free.lock();
        let ready = min(num, free.len());

        for _ in 0..ready {
            match free.pop() {
                Some(index) => bufs.push(self.make_buf(index)),
                None => break,
            }
        }
        drop(free);

        if ready < num {
            self.inner
                .alloc_failures
                .fetch_add((num - ready) as u64, Ordering::Relaxed);
        }

        ready
    }

    /// Return a buffer. The payload is discarded; the next owner of the slot starts with an
    /// empty buffer and full head/tail room.
    ///
    /// A buffer issued by a different pool goes back to that pool instead.
    #[inline]
    pub fn free(&self, buf: BufMmap) {
        let (origin, index) = buf.detach();
        origin.release(index);
    }

    /// Return every buffer in `bufs` under one lock. Returns how many were drained.
    pub fn put(&self, bufs: &mut Vec<BufMmap>) -> usize {
        let num = bufs.len();
        if num == 0 {
            return 0;
        }

        let mut free = self.inner.free.lock();
        for buf in bufs.drain(..) {
            if buf.is_from(&self.inner) {
                let (_, index) = buf.detach();
                free.push(index);
            } else {
                drop(free);
                self.free(buf);
                free = self.inner.free.lock();
            }
        }

        num
    }

    /// Release the pool. Rejected while any buffer is still issued; the arena then stays mapped
    /// until the last of those buffers comes back.
    pub fn destroy(self) -> Result<(), PoolError> {
        let issued = self.issued_count();
        if issued != 0 {
            return Err(PoolError::BuffersOutstanding { issued });
        }

        debug!(name = %self.inner.name, "destroyed pool");

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn cache_size(&self) -> usize {
        self.inner.cache_size
    }

    pub fn element_size(&self) -> usize {
        self.inner.area.get_buf_len()
    }

    pub fn headroom(&self) -> usize {
        self.inner.headroom
    }

    pub fn free_count(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Buffers currently owned by the application or a device queue
    pub fn issued_count(&self) -> usize {
        self.inner.capacity - self.free_count()
    }

    /// Number of buffers requested but not handed out because the pool was empty
    pub fn alloc_failures(&self) -> u64 {
        self.inner.alloc_failures.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.free_count()
    }

    pub fn is_empty(&self) -> bool {
        self.free_count() == 0
    }
}

impl fmt::Debug for BufPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("cache_size", &self.inner.cache_size)
            .field("element_size", &self.inner.area.get_buf_len())
            .field("free", &self.free_count())
            .finish()
    }
}
