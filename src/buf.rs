use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufError {
    #[error("insufficient tailroom: need {requested} bytes, {available} available")]
    InsufficientTailroom { requested: usize, available: usize },

    #[error("insufficient headroom: need {requested} bytes, {available} available")]
    InsufficientHeadroom { requested: usize, available: usize },
}

/// The Buf trait represents a packet buffer.
///
/// The backing region is split into `headroom | payload | tailroom`. The payload starts empty
/// and grows towards the tail with `append` or towards the head with `prepend`.
pub trait Buf {
    /// Returns a reference to the payload, excluding head and tail room
    fn get_data(&self) -> &[u8];

    /// Returns a mutable reference to the payload, excluding head and tail room
    fn get_data_mut(&mut self) -> &mut [u8];

    /// Returns the total capacity of the backing region
    fn get_capacity(&self) -> usize;

    /// Returns the length of the portion of the buffer that contains packet data
    fn get_len(&self) -> usize;

    /// Returns the number of bytes in the buffer which precede the packet data
    fn get_headroom(&self) -> usize;

    /// Returns the number of unused bytes after the packet data
    fn get_tailroom(&self) -> usize {
        self.get_capacity() - self.get_headroom() - self.get_len()
    }

    fn is_empty(&self) -> bool {
        self.get_len() == 0
    }

    /// Copies `data` after the current payload. On error the buffer is left untouched.
    fn append(&mut self, data: &[u8]) -> Result<(), BufError>;

    /// Copies `data` in front of the current payload. On error the buffer is left untouched.
    fn prepend(&mut self, data: &[u8]) -> Result<(), BufError>;

    /// Drops the payload and restores the initial headroom.
    fn reset(&mut self);
}
