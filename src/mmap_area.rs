use std::ptr::NonNull;

use errno::errno;
use libc::{
    c_int, c_void, mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_HUGETLB, MAP_PRIVATE, PROT_READ,
    PROT_WRITE,
};
use thiserror::Error;
use tracing::{trace, warn};

/// A mapped memory area carved into `buf_num` equally sized buffers. Every buffer pool owns one.
#[derive(Debug)]
pub struct MmapArea {
    ptr: NonNull<u8>,
    buf_num: usize,
    buf_len: usize,
}

// The area is plain anonymous memory. Disjoint buffer slots are handed out by the pool, which is
// what makes concurrent access to different slots sound.
unsafe impl Send for MmapArea {}
unsafe impl Sync for MmapArea {}

#[derive(Debug, Error)]
pub enum MmapError {
    #[error("cannot map an empty area ({buf_num} buffers of {buf_len} bytes)")]
    Empty { buf_num: usize, buf_len: usize },

    #[error("area size overflows: {buf_num} buffers of {buf_len} bytes")]
    Overflow { buf_num: usize, buf_len: usize },

    #[error("mmap of {size} bytes failed: errno {errno}")]
    Failed { size: usize, errno: i32 },
}

/// Configuration options for MmapArea
#[derive(Copy, Clone, Debug, Default)]
pub struct MmapAreaOptions {
    /// If set to true, the mmap call is passed MAP_HUGETLB
    pub huge_tlb: bool,
}

impl MmapArea {
    /// Allocate a new memory mapped area based on the size and number of buffers
    ///
    /// # Arguments
    ///
    /// * buf_num: The number of buffers to allocate in the memory mapped area
    /// * buf_len: The length of each buffer
    /// * options: Configuration options
    pub fn new(
        buf_num: usize,
        buf_len: usize,
        options: MmapAreaOptions,
    ) -> Result<MmapArea, MmapError> {
        if buf_num == 0 || buf_len == 0 {
            return Err(MmapError::Empty { buf_num, buf_len });
        }
        let size = buf_num
            .checked_mul(buf_len)
            .ok_or(MmapError::Overflow { buf_num, buf_len })?;

        let mut flags: c_int = MAP_PRIVATE | MAP_ANONYMOUS;
        if options.huge_tlb {
            flags |= MAP_HUGETLB;
        }

        let ptr: *mut c_void;
        unsafe {
            ptr = mmap(
                std::ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                flags,
                -1,
                0,
            );
        }

        if ptr == MAP_FAILED {
            return Err(MmapError::Failed {
                size,
                errno: errno().0,
            });
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or(MmapError::Failed { size, errno: 0 })?;

        trace!(buf_num, buf_len, size, huge_tlb = options.huge_tlb, "mapped area");

        Ok(MmapArea {
            ptr,
            buf_num,
            buf_len,
        })
    }

    pub fn get_buf_num(&self) -> usize {
        self.buf_num
    }

    pub fn get_buf_len(&self) -> usize {
        self.buf_len
    }

    /// Start of the buffer at `index`. `index` must be below `buf_num`.
    #[inline]
    pub(crate) fn buf_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.buf_num);
        // In bounds: index < buf_num and the mapping is buf_num * buf_len bytes long.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(index * self.buf_len)) }
    }
}

impl Drop for MmapArea {
    fn drop(&mut self) {
        let r: c_int;

        unsafe {
            r = munmap(self.ptr.as_ptr() as *mut c_void, self.buf_num * self.buf_len);
        }

        if r != 0 {
            warn!(errno = errno().0, "munmap failed");
        }
    }
}
