//! Aligned scratch buffers for engine I/O.
//!
//! libvhd performs unbuffered I/O and rejects buffers whose start address is
//! not sector aligned. `Vec<u8>` only guarantees 1-byte alignment, so the
//! buffer over-allocates by `alignment - 1` bytes and hands out views that
//! begin at the first suitably aligned address inside the allocation.

use crate::error::{Error, Result};
use crate::vhd::SECTOR_SIZE;

/// Default buffer alignment in bytes.
pub const DEFAULT_ALIGNMENT: usize = SECTOR_SIZE as usize;

/// A fixed-size byte buffer whose usable region starts on an aligned address.
///
/// All accessors are bounds-checked against the logical size, never against
/// the larger backing allocation.
///
/// # Example
///
/// ```
/// use vhdtool_core::buffer::AlignedBuffer;
///
/// let mut buf = AlignedBuffer::new(1024, 512).unwrap();
/// assert_eq!(buf.as_ptr() as usize % 512, 0);
///
/// buf.write(b"hello", 0).unwrap();
/// assert_eq!(buf.read(0, Some(5)).unwrap(), b"hello");
/// ```
pub struct AlignedBuffer {
    /// Backing storage, `alignment + size - 1` bytes.
    storage: Box<[u8]>,
    /// Offset into `storage` where the aligned region begins.
    base: usize,
    /// Logical size in bytes.
    size: usize,
    alignment: usize,
}

impl AlignedBuffer {
    /// Allocates a zeroed buffer of `size` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAlignment`] if `alignment` is zero.
    /// - [`Error::InvalidSize`] if the backing allocation size overflows or
    ///   the allocation cannot be reserved.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if alignment < 1 {
            return Err(Error::InvalidAlignment { alignment });
        }

        let backing = alignment
            .checked_add(size)
            .map(|n| n - 1)
            .ok_or_else(|| Error::invalid_size(format!("Buffer size {} too large", size)))?;

        let mut storage: Vec<u8> = Vec::new();
        storage.try_reserve_exact(backing).map_err(|e| {
            Error::invalid_size(format!("Buffer size {} cannot be allocated: {}", size, e))
        })?;
        storage.resize(backing, 0);
        let storage = storage.into_boxed_slice();

        // The boxed slice never moves or reallocates, so the base stays aligned
        // for the lifetime of the buffer.
        let addr = storage.as_ptr() as usize;
        let base = (alignment - addr % alignment) % alignment;
        debug_assert!(base + size <= storage.len());

        Ok(Self {
            storage,
            base,
            size,
            alignment,
        })
    }

    /// Allocates a buffer aligned to [`DEFAULT_ALIGNMENT`].
    pub fn with_default_alignment(size: usize) -> Result<Self> {
        Self::new(size, DEFAULT_ALIGNMENT)
    }

    /// Logical size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Pointer to the aligned start of the usable region.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.storage[self.base..].as_ptr()
    }

    /// Mutable pointer to the aligned start of the usable region.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.storage[self.base..].as_mut_ptr()
    }

    /// Resolves `(offset, length)` into an absolute range of `storage`.
    fn range(&self, offset: usize, length: Option<usize>) -> Result<std::ops::Range<usize>> {
        if offset >= self.size {
            return Err(Error::invalid_offset(format!(
                "Offset {} must be < buffer size {}",
                offset, self.size
            )));
        }
        let remaining = self.size - offset;
        let length = match length {
            None => remaining,
            Some(len) if len > remaining => {
                return Err(Error::invalid_size(format!(
                    "Length {} too large for offset {} in buffer of {} bytes",
                    len, offset, self.size
                )));
            }
            Some(len) => len,
        };

        let start = self.base + offset;
        Ok(start..start + length)
    }

    /// Returns a view of `length` bytes starting at `offset`.
    ///
    /// `length` defaults to the remainder of the buffer.
    pub fn slice(&self, offset: usize, length: Option<usize>) -> Result<&[u8]> {
        let range = self.range(offset, length)?;
        Ok(&self.storage[range])
    }

    /// Mutable counterpart of [`slice`](Self::slice).
    pub fn slice_mut(&mut self, offset: usize, length: Option<usize>) -> Result<&mut [u8]> {
        let range = self.range(offset, length)?;
        Ok(&mut self.storage[range])
    }

    /// Copies `data` into the buffer at `offset`.
    pub fn write(&mut self, data: &[u8], offset: usize) -> Result<()> {
        self.slice_mut(offset, Some(data.len()))?.copy_from_slice(data);
        Ok(())
    }

    /// Copies bytes out of the buffer. `length` defaults to the remainder.
    pub fn read(&self, offset: usize, length: Option<usize>) -> Result<Vec<u8>> {
        Ok(self.slice(offset, length)?.to_vec())
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_alignment() {
        let buf = AlignedBuffer::with_default_alignment(10).unwrap();
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.alignment(), 512);
        assert_eq!(buf.as_ptr() as usize % 512, 0);
    }

    #[test]
    fn test_odd_alignment() {
        let buf = AlignedBuffer::new(10, 300).unwrap();
        assert_eq!(buf.as_ptr() as usize % 300, 0);
    }

    #[test]
    fn test_zero_alignment_rejected() {
        let err = AlignedBuffer::new(10, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidAlignment { alignment: 0 }));
    }

    #[test]
    fn test_overflowing_size_rejected() {
        let err = AlignedBuffer::new(usize::MAX, 512).unwrap_err();
        assert!(matches!(err, Error::InvalidSize { .. }));
    }

    #[test]
    fn test_unallocatable_size_rejected() {
        let err = AlignedBuffer::new(usize::MAX / 2 + 1, 512).unwrap_err();
        assert!(matches!(err, Error::InvalidSize { .. }));
    }

    #[test]
    fn test_base_within_backing() {
        for alignment in [1, 2, 3, 7, 64, 512, 4096] {
            let buf = AlignedBuffer::new(100, alignment).unwrap();
            assert!(buf.base + buf.size <= buf.storage.len());
            assert!(buf.base < alignment);
        }
    }

    #[test]
    fn test_starts_zeroed() {
        let buf = AlignedBuffer::new(20, 512).unwrap();
        assert_eq!(buf.read(0, None).unwrap(), vec![0u8; 20]);
    }
}
