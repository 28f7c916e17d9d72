//! Notification buffers
//!
//! A `NotifyBuffer` encapsulates the contents of a protocol-level error
//! notification: a numeric code, a numeric subcode and an opaque payload.
//! Components that report such errors hand buffers around with three
//! ownership-transfer primitives: [`set`], [`set_as_copy`] and
//! [`set_and_move`].

use serde::{Deserialize, Serialize};

/// Payload capacity is rounded up to a multiple of this many bytes.
const BLOCK: usize = 32;

/// Rounding always leaves at least this much slack beyond the payload.
const SLACK: usize = 16;

/// Capacity for a payload of the given length.
///
/// Rounds up to a multiple of 32 such that at least 16 bytes remain free.
fn rounded_size(length: usize) -> usize {
    ((length + BLOCK + SLACK - 1) / BLOCK) * BLOCK
}

/// A growable, length-tracked notification buffer.
///
/// The backing storage is kept zero-filled beyond `length`, so two buffers
/// with the same payload compare equal regardless of their capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyBuffer {
    code: u8,
    subcode: u8,
    data: Vec<u8>,
    length: usize,
}

impl NotifyBuffer {
    /// Create an empty buffer with no expected payload.
    pub fn new(code: u8, subcode: u8) -> Self {
        Self::with_expected(code, subcode, 0)
    }

    /// Create a buffer sized for an expected amount of payload data.
    pub fn with_expected(code: u8, subcode: u8, expect: usize) -> Self {
        let size = rounded_size(expect);
        Self {
            code,
            subcode,
            data: vec![0; size],
            length: 0,
        }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn subcode(&self) -> u8 {
        self.subcode
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current capacity of the backing storage.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The payload written so far.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Append payload bytes, growing the backing storage as needed.
    ///
    /// Growth reallocates to the next block boundary and zero-fills the new
    /// slack, so repeated small appends are amortized. Copes with a zero
    /// length append.
    pub fn append(&mut self, bytes: &[u8]) {
        let new_length = self.length + bytes.len();

        if new_length > self.data.len() {
            let size = rounded_size(new_length);
            self.data.resize(size, 0);
        }

        if !bytes.is_empty() {
            self.data[self.length..new_length].copy_from_slice(bytes);
        }

        self.length = new_length;
    }

    /// Independent deep copy, with capacity recomputed for the payload.
    pub fn duplicate(&self) -> Self {
        let size = rounded_size(self.length);
        let mut data = vec![0; size];
        data[..self.length].copy_from_slice(self.payload());

        Self {
            code: self.code,
            subcode: self.subcode,
            data,
            length: self.length,
        }
    }
}

impl PartialEq for NotifyBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.subcode == other.subcode
            && self.payload() == other.payload()
    }
}

impl Eq for NotifyBuffer {}

/* ===================== Ownership transfer ===================== */

/// Install a new value at the destination slot, releasing whatever was there.
///
/// The caller gives up responsibility for `src`.
pub fn set(dst: &mut Option<NotifyBuffer>, src: Option<NotifyBuffer>) {
    *dst = src;
}

/// Install a duplicate of the source; the caller retains the original.
pub fn set_as_copy(dst: &mut Option<NotifyBuffer>, src: Option<&NotifyBuffer>) {
    *dst = src.map(NotifyBuffer::duplicate);
}

/// Install the value and clear the source, transferring sole ownership.
pub fn set_and_move(dst: &mut Option<NotifyBuffer>, src: &mut Option<NotifyBuffer>) {
    *dst = src.take();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing_leaves_slack() {
        assert_eq!(rounded_size(0), 32);
        assert_eq!(rounded_size(16), 32);
        assert_eq!(rounded_size(17), 64);
        assert_eq!(rounded_size(48), 64);

        // At least 16 bytes of slack for any length
        for length in 0..200 {
            let size = rounded_size(length);
            assert!(size >= length + SLACK);
            assert_eq!(size % BLOCK, 0);
        }
    }

    #[test]
    fn test_append_grows_and_zero_fills() {
        let mut notify = NotifyBuffer::new(6, 1);
        assert_eq!(notify.capacity(), 32);

        notify.append(b"hello");
        assert_eq!(notify.payload(), b"hello");
        assert_eq!(notify.capacity(), 32);

        // Zero length append is a no-op
        notify.append(b"");
        assert_eq!(notify.len(), 5);

        // Grow past the first block
        notify.append(&[0xab; 60]);
        assert_eq!(notify.len(), 65);
        assert_eq!(notify.capacity(), rounded_size(65));

        // Slack beyond the payload stays zero-filled
        assert!(notify.data[notify.length..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut original = NotifyBuffer::with_expected(3, 2, 8);
        original.append(b"detail");

        let mut copy = original.duplicate();
        assert_eq!(copy, original);

        copy.append(b" more");
        assert_ne!(copy, original);
        assert_eq!(original.payload(), b"detail");
    }

    #[test]
    fn test_equality_ignores_capacity() {
        let mut a = NotifyBuffer::with_expected(1, 1, 0);
        let mut b = NotifyBuffer::with_expected(1, 1, 100);
        a.append(b"x");
        b.append(b"x");
        assert_ne!(a.capacity(), b.capacity());
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_releases_destination() {
        let mut slot = Some(NotifyBuffer::new(1, 0));
        set(&mut slot, Some(NotifyBuffer::new(2, 0)));
        assert_eq!(slot.as_ref().map(|n| n.code()), Some(2));

        set(&mut slot, None);
        assert!(slot.is_none());
    }

    #[test]
    fn test_set_as_copy_keeps_original() {
        let mut src = NotifyBuffer::new(6, 3);
        src.append(b"kept");
        let mut dst = None;

        set_as_copy(&mut dst, Some(&src));
        assert_eq!(dst.as_ref().map(|n| n.payload()), Some(&b"kept"[..]));

        // Caller still owns the original
        assert_eq!(src.payload(), b"kept");
    }

    #[test]
    fn test_set_and_move_clears_source() {
        let mut src = Some(NotifyBuffer::new(4, 0));
        let mut dst = Some(NotifyBuffer::new(9, 9));

        set_and_move(&mut dst, &mut src);
        assert!(src.is_none());
        assert_eq!(dst.map(|n| n.code()), Some(4));
    }
}
