//! Cache key definitions.
//!
//! A [`CacheKey`] identifies one query execution: the statement id, the row
//! bounds, the rendered SQL, and every bound parameter are folded into it as
//! [`Factor`]s, in that order.

use std::fmt;
use std::hash::{Hash, Hasher};

use super::error::{CacheError, CacheResult};

const DEFAULT_MULTIPLIER: i32 = 37;
const DEFAULT_HASHCODE: i32 = 17;

// ============================================================================
// Factor
// ============================================================================

/// A single value folded into a [`CacheKey`].
///
/// Hashing is deterministic across processes so that keys render the same
/// way in logs regardless of the hasher seed.
#[derive(Debug, Clone)]
pub enum Factor {
    Null,
    Bool(bool),
    Int(i64),
    /// Unsigned values above `i64::MAX`; smaller ones are stored as `Int`.
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Factor>),
}

impl Factor {
    /// Build a byte-array factor.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// The 32-bit hash contribution of this value. `Null` hashes to 1.
    pub fn hash_code(&self) -> i32 {
        match self {
            Self::Null => 1,
            Self::Bool(true) => 1231,
            Self::Bool(false) => 1237,
            Self::Int(value) => fold_u64(*value as u64),
            Self::UInt(value) => fold_u64(*value),
            Self::Float(value) => fold_u64(canonical_bits(*value)),
            Self::Text(text) => text
                .encode_utf16()
                .fold(0_i32, |hash, unit| {
                    hash.wrapping_mul(31).wrapping_add(i32::from(unit))
                }),
            Self::Bytes(bytes) => bytes.iter().fold(1_i32, |hash, byte| {
                hash.wrapping_mul(31).wrapping_add(i32::from(*byte as i8))
            }),
            Self::List(items) => items.iter().fold(1_i32, |hash, item| {
                hash.wrapping_mul(31).wrapping_add(item.hash_code())
            }),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

fn fold_u64(bits: u64) -> i32 {
    (bits ^ (bits >> 32)) as i32
}

fn canonical_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

impl PartialEq for Factor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            // Bit equality: NaN matches NaN, 0.0 and -0.0 differ.
            (Self::Float(a), Self::Float(b)) => canonical_bits(*a) == canonical_bits(*b),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Factor {}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::UInt(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
            Self::Bytes(bytes) => write!(f, "{bytes:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! int_factor {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Factor {
                fn from(value: $ty) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

int_factor!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Factor {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(int) => Self::Int(int),
            Err(_) => Self::UInt(value),
        }
    }
}

impl From<usize> for Factor {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<bool> for Factor {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for Factor {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for Factor {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Factor {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Factor {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Factor {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<&[u8]> for Factor {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl<T: Into<Factor>> From<Option<T>> for Factor {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Factor>> From<Vec<T>> for Factor {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<&serde_json::Value> for Factor {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => match (number.as_i64(), number.as_u64()) {
                (Some(int), _) => Self::Int(int),
                (None, Some(uint)) => Self::UInt(uint),
                (None, None) => Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            // serde_json maps iterate in key order, so this stays deterministic.
            Value::Object(fields) => Self::List(
                fields
                    .iter()
                    .map(|(name, field)| Self::List(vec![Self::Text(name.clone()), field.into()]))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Factor {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

// ============================================================================
// CacheKey
// ============================================================================

/// Composite identity of a query execution.
///
/// Factors are append-only. Equality first compares the combined hash, the
/// checksum and the factor count, then every factor positionally.
#[derive(Debug, Clone)]
pub struct CacheKey {
    multiplier: i32,
    hashcode: i32,
    checksum: i64,
    count: u32,
    factors: Vec<Factor>,
    sealed: bool,
}

impl CacheKey {
    /// Key for calls whose results cannot be cached. Rejects every update.
    pub const NULL: CacheKey = CacheKey {
        multiplier: DEFAULT_MULTIPLIER,
        hashcode: DEFAULT_HASHCODE,
        checksum: 0,
        count: 0,
        factors: Vec::new(),
        sealed: true,
    };

    pub fn new() -> Self {
        Self {
            multiplier: DEFAULT_MULTIPLIER,
            hashcode: DEFAULT_HASHCODE,
            checksum: 0,
            count: 0,
            factors: Vec::new(),
            sealed: false,
        }
    }

    /// Build a key from factors in iteration order.
    pub fn from_factors<I>(factors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Factor>,
    {
        let mut key = Self::new();
        for factor in factors {
            key.fold(factor.into());
        }
        key
    }

    /// Fold one factor into the key.
    pub fn update(&mut self, factor: impl Into<Factor>) -> CacheResult<()> {
        if self.sealed {
            return Err(CacheError::NullKeyMutation);
        }
        self.fold(factor.into());
        Ok(())
    }

    /// Fold every factor in order.
    pub fn update_all<I>(&mut self, factors: I) -> CacheResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Factor>,
    {
        if self.sealed {
            return Err(CacheError::NullKeyMutation);
        }
        for factor in factors {
            self.fold(factor.into());
        }
        Ok(())
    }

    fn fold(&mut self, factor: Factor) {
        let base = factor.hash_code();

        self.count += 1;
        self.checksum += i64::from(base);
        // Weighting by position keeps permutations of the same factors apart.
        let weighted = base.wrapping_mul(self.count as i32);
        self.hashcode = self.multiplier.wrapping_mul(self.hashcode).wrapping_add(weighted);

        self.factors.push(factor);
    }

    pub fn hash_code(&self) -> i32 {
        self.hashcode
    }

    pub fn checksum(&self) -> i64 {
        self.checksum
    }

    pub fn update_count(&self) -> usize {
        self.factors.len()
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    pub fn is_null(&self) -> bool {
        self.sealed
    }
}

impl Default for CacheKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        if self.hashcode != other.hashcode
            || self.checksum != other.checksum
            || self.count != other.count
        {
            return false;
        }
        self.factors
            .iter()
            .zip(other.factors.iter())
            .all(|(this, that)| this == that)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hashcode);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hashcode, self.checksum)?;
        for factor in &self.factors {
            write!(f, ":{factor}")?;
        }
        Ok(())
    }
}
