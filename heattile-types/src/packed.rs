use serde::{Deserialize, Serialize};

/// Packs a user count and a trip count into one 64-bit cell value.
///
/// The user count occupies the high word and the trip count the low word.
pub const fn encode(user_count: u32, trip_count: u32) -> u64 {
    ((user_count as u64) << 32) | trip_count as u64
}

/// Splits a packed cell value back into `(user_count, trip_count)`.
pub const fn decode(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, (value & u32::MAX as u64) as u32)
}

/// A decoded packed cell: distinct contributors and total crossings.
///
/// # Examples
///
/// ```
/// use heattile_types::packed::PackedCount;
///
/// let cell = PackedCount::new(100, 0);
/// assert_eq!(cell.raw(), 429_496_729_600);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PackedCount {
    pub users: u32,
    pub trips: u32,
}

impl PackedCount {
    pub const fn new(users: u32, trips: u32) -> Self {
        Self { users, trips }
    }

    pub const fn from_raw(value: u64) -> Self {
        let (users, trips) = decode(value);
        Self { users, trips }
    }

    pub const fn raw(&self) -> u64 {
        encode(self.users, self.trips)
    }

    pub const fn is_empty(&self) -> bool {
        self.users == 0 && self.trips == 0
    }
}

impl From<u64> for PackedCount {
    fn from(value: u64) -> Self {
        Self::from_raw(value)
    }
}

impl From<PackedCount> for u64 {
    fn from(value: PackedCount) -> Self {
        value.raw()
    }
}
