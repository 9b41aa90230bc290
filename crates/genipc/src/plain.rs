//! Marker trait for values transferred as raw memory.
//!
//! Typed sends, typed receives and shared memory attachments all move the
//! in-memory representation of a value without any encoding. That is only
//! sound for types where every byte is initialized and every bit pattern is a
//! valid value, and it is only meaningful between peers that agree on size,
//! alignment and byte order. No attempt is made to make these transfers
//! portable.

/// Types whose in-memory bytes may be sent, received, or shared verbatim.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - the type has no padding bytes (every byte of the value is initialized),
/// - every bit pattern of `size_of::<Self>()` bytes is a valid value,
/// - the type holds no pointers, references, or handles to process-local state.
///
/// Use `#[repr(C)]` (or `#[repr(transparent)]`) for structs and lay fields out
/// so the compiler inserts no padding.
pub unsafe trait Plain: Copy + 'static {}

macro_rules! impl_plain {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: primitive numeric types have no padding and accept any bit pattern.
            unsafe impl Plain for $ty {}
        )*
    };
}

impl_plain!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

// SAFETY: arrays of `Plain` elements are contiguous with no padding between elements.
unsafe impl<T: Plain, const N: usize> Plain for [T; N] {}

/// View a `Plain` slice as its raw bytes.
pub(crate) fn as_bytes<T: Plain>(values: &[T]) -> &[u8] {
    let len = std::mem::size_of_val(values);
    // SAFETY: `T: Plain` guarantees every byte is initialized; the length covers
    // exactly the slice's memory and the lifetime is tied to `values`.
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), len) }
}

/// View a `Plain` slice as mutable raw bytes.
pub(crate) fn as_bytes_mut<T: Plain>(values: &mut [T]) -> &mut [u8] {
    let len = std::mem::size_of_val(values);
    // SAFETY: `T: Plain` accepts any bit pattern, so arbitrary writes through the
    // byte view leave every element valid.
    unsafe { std::slice::from_raw_parts_mut(values.as_mut_ptr().cast::<u8>(), len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_view_covers_whole_slice() {
        let values = [1u32, 2, 3];
        assert_eq!(as_bytes(&values).len(), 12);
        assert_eq!(&as_bytes(&values)[..4], &1u32.to_ne_bytes());
    }

    #[test]
    fn mutable_view_writes_through() {
        let mut value = [0u16; 2];
        as_bytes_mut(&mut value).copy_from_slice(&[0xFF; 4]);
        assert_eq!(value, [u16::MAX, u16::MAX]);
    }
}
