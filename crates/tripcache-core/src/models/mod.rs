//! Booking data models.
//!
//! - `Booking`: the cached payload (reference, token, expiry, segments)
//! - `Segment`, `OriginDestination`, `Location`: route legs
//! - `ValidationRules`: configurable semantic checks applied after decode
//! - `SizeOf`: explicit byte estimate used for cache memory accounting

pub mod booking;
pub mod segment;

pub use booking::{Booking, ValidationRules};
pub use segment::{Location, OriginDestination, Segment};

/// Approximate in-memory footprint of a value, in bytes.
///
/// Must be deterministic: equal values report equal sizes.
pub trait SizeOf {
    fn size_of(&self) -> usize;
}

impl SizeOf for String {
    fn size_of(&self) -> usize {
        std::mem::size_of::<String>() + self.len()
    }
}

impl<T: SizeOf> SizeOf for Vec<T> {
    fn size_of(&self) -> usize {
        std::mem::size_of::<Vec<T>>() + self.iter().map(SizeOf::size_of).sum::<usize>()
    }
}

impl<T: SizeOf> SizeOf for std::sync::Arc<T> {
    fn size_of(&self) -> usize {
        (**self).size_of()
    }
}

macro_rules! fixed_size {
    ($($t:ty),*) => {
        $(impl SizeOf for $t {
            fn size_of(&self) -> usize {
                std::mem::size_of::<$t>()
            }
        })*
    };
}

fixed_size!(bool, u8, u32, u64, i32, i64, usize, f64);
