use std::io::{self, Read};

/// Fixed-capacity receive buffer for one connection
///
/// Bytes are only ever appended at the cursor; the buffer never grows past
/// the capacity chosen at accept time.
pub struct ReadBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl ReadBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Bytes received so far
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Unused tail that the next receive writes into
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` bytes of the spare tail as filled
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.len = (self.len + n).min(self.data.len());
    }

    /// Perform one read into the spare tail.
    ///
    /// `Ok(0)` means the peer closed; callers must not call this on a full
    /// buffer since that would be indistinguishable from end of stream.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        debug_assert!(!self.is_full());
        let n = reader.read(self.spare_mut())?;
        self.advance(n);
        Ok(n)
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }
}
