//! Delta coding of integer sequences
//!
//! Each field of a block gets its own running value, reset per block.
//! Arithmetic wraps so arbitrary inputs round trip.

/// Integer types that can be delta coded
pub trait DeltaValue: Copy + Default + PartialEq + std::fmt::Debug {
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
}

macro_rules! impl_delta_value {
    ($($t:ty),*) => {
        $(
            impl DeltaValue for $t {
                #[inline]
                fn wrapping_add(self, rhs: Self) -> Self {
                    <$t>::wrapping_add(self, rhs)
                }

                #[inline]
                fn wrapping_sub(self, rhs: Self) -> Self {
                    <$t>::wrapping_sub(self, rhs)
                }
            }
        )*
    };
}

impl_delta_value!(i32, i64);

/// Turns absolute values into differences to the previous value
#[derive(Debug, Clone, Default)]
pub struct DeltaEncoder<T: DeltaValue> {
    previous: T,
}

impl<T: DeltaValue> DeltaEncoder<T> {
    pub fn new() -> Self {
        DeltaEncoder {
            previous: T::default(),
        }
    }

    /// Record `value` and return its delta
    #[inline]
    pub fn update(&mut self, value: T) -> T {
        let delta = value.wrapping_sub(self.previous);
        self.previous = value;
        delta
    }

    pub fn clear(&mut self) {
        self.previous = T::default();
    }
}

/// Turns differences back into absolute values
#[derive(Debug, Clone, Default)]
pub struct DeltaDecoder<T: DeltaValue> {
    value: T,
}

impl<T: DeltaValue> DeltaDecoder<T> {
    pub fn new() -> Self {
        DeltaDecoder {
            value: T::default(),
        }
    }

    /// Apply `delta` and return the absolute value
    #[inline]
    pub fn update(&mut self, delta: T) -> T {
        self.value = self.value.wrapping_add(delta);
        self.value
    }

    pub fn clear(&mut self) {
        self.value = T::default();
    }
}

/// Delta encode a whole sequence
pub fn encode_all<T: DeltaValue>(values: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut encoder = DeltaEncoder::new();
    values.into_iter().map(|v| encoder.update(v)).collect()
}

/// Decode a whole delta coded sequence
pub fn decode_all<T: DeltaValue>(deltas: &[T]) -> Vec<T> {
    let mut decoder = DeltaDecoder::new();
    deltas.iter().map(|&d| decoder.update(d)).collect()
}
