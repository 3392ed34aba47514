//! Cell value types a heat map tile can hold.

use heattile_types::packed;
use std::fmt::Debug;

/// A counter stored in a tile cell.
///
/// Zero means "no data" and is never materialized. Additions saturate at
/// `MAX` instead of wrapping.
pub trait CellValue: Copy + Default + PartialEq + PartialOrd + Debug + Send + Sync + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;

    const MAX: Self;

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    fn saturating_add(self, other: Self) -> Self;

    /// Converts a raw `u32` count, clamping to `MAX` when it doesn't fit.
    fn from_count(count: u32) -> Self;

    fn to_u64(self) -> u64;

    fn write_le(self, out: &mut Vec<u8>);

    /// Reads a value from exactly `WIDTH` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_cell_value {
    ($($ty:ty => $add:path),*) => {
        $(
            impl CellValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                const MAX: Self = <$ty>::MAX;

                #[inline]
                fn saturating_add(self, other: Self) -> Self {
                    $add(self, other)
                }

                #[inline]
                fn from_count(count: u32) -> Self {
                    <$ty>::try_from(count).unwrap_or(<$ty>::MAX)
                }

                #[inline]
                fn to_u64(self) -> u64 {
                    self as u64
                }

                #[inline]
                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

/// `u64` cells hold packed `(users, trips)` pairs, so each half saturates on
/// its own instead of carrying into the other.
fn packed_saturating_add(a: u64, b: u64) -> u64 {
    let (a_users, a_trips) = packed::decode(a);
    let (b_users, b_trips) = packed::decode(b);
    packed::encode(a_users.saturating_add(b_users), a_trips.saturating_add(b_trips))
}

impl_cell_value!(
    u8 => u8::saturating_add,
    u32 => u32::saturating_add,
    u64 => packed_saturating_add
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_add_clamps() {
        assert_eq!(CellValue::saturating_add(250u8, 10), u8::MAX);
        assert_eq!(CellValue::saturating_add(u32::MAX - 1, 5), u32::MAX);
        assert_eq!(CellValue::saturating_add(1u64, 2), 3);
    }

    #[test]
    fn test_packed_halves_saturate_separately() {
        let near_full = packed::encode(1, u32::MAX - 1);
        let sum = CellValue::saturating_add(near_full, packed::encode(2, 5));
        assert_eq!(packed::decode(sum), (3, u32::MAX));

        let sum = CellValue::saturating_add(packed::encode(u32::MAX, 1), packed::encode(1, 1));
        assert_eq!(packed::decode(sum), (u32::MAX, 2));
    }

    #[test]
    fn test_from_count_clamps_narrow_types() {
        assert_eq!(u8::from_count(300), 255);
        assert_eq!(u8::from_count(7), 7);
        assert_eq!(u64::from_count(u32::MAX), u32::MAX as u64);
    }

    #[test]
    fn test_byte_codec() {
        let mut buf = Vec::new();
        0xDEAD_BEEFu32.write_le(&mut buf);
        assert_eq!(buf.len(), u32::WIDTH);
        assert_eq!(u32::read_le(&buf), 0xDEAD_BEEF);
    }

    #[test]
    fn test_zero_detection() {
        assert!(0u32.is_zero());
        assert!(!1u8.is_zero());
    }
}
