//! Wire-level storage primitives.

use crate::error::{CodecError, CodecResult};
use crate::keys::{ClassKey, ObjKey};
use crate::types::PropertyType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A value as the storage engine sees it.
///
/// This is the small fixed set of primitives every engine call speaks.
/// User-facing types (sized integers, polymorphic values, typed objects)
/// are converted to and from this representation by the binding core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageValue {
    /// Null value.
    Null,
    /// 64-bit signed integer.
    Int(i64),
    /// Boolean value.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Byte buffer.
    Binary(Bytes),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Point in time.
    Timestamp(Timestamp),
    /// 128-bit decimal.
    Decimal128(Decimal128),
    /// 12-byte object identifier.
    ObjectId(ObjectId),
    /// 16-byte UUID.
    Uuid(Uuid),
    /// Link to an object row.
    Link(Link),
    /// Marker: the slot holds a nested list, reachable through the collection API.
    List,
    /// Marker: the slot holds a nested dictionary, reachable through the collection API.
    Dictionary,
}

impl StorageValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, StorageValue::Null)
    }

    /// Returns the property type this value can be stored in, if any.
    ///
    /// Null and nested-collection markers have no scalar type.
    pub fn property_type(&self) -> Option<PropertyType> {
        match self {
            StorageValue::Null | StorageValue::List | StorageValue::Dictionary => None,
            StorageValue::Int(_) => Some(PropertyType::Int),
            StorageValue::Bool(_) => Some(PropertyType::Bool),
            StorageValue::String(_) => Some(PropertyType::String),
            StorageValue::Binary(_) => Some(PropertyType::Binary),
            StorageValue::Float(_) => Some(PropertyType::Float),
            StorageValue::Double(_) => Some(PropertyType::Double),
            StorageValue::Timestamp(_) => Some(PropertyType::Timestamp),
            StorageValue::Decimal128(_) => Some(PropertyType::Decimal128),
            StorageValue::ObjectId(_) => Some(PropertyType::ObjectId),
            StorageValue::Uuid(_) => Some(PropertyType::Uuid),
            StorageValue::Link(_) => Some(PropertyType::Object),
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StorageValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StorageValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a link, if it is one.
    pub fn as_link(&self) -> Option<Link> {
        match self {
            StorageValue::Link(link) => Some(*link),
            _ => None,
        }
    }
}

impl fmt::Display for StorageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageValue::Null => f.write_str("null"),
            StorageValue::Int(n) => write!(f, "{n}"),
            StorageValue::Bool(b) => write!(f, "{b}"),
            StorageValue::String(s) => f.write_str(s),
            StorageValue::Binary(b) => write!(f, "{:?}", b.as_ref()),
            StorageValue::Float(v) => write!(f, "{v}"),
            StorageValue::Double(v) => write!(f, "{v}"),
            StorageValue::Timestamp(t) => write!(f, "{t}"),
            StorageValue::Decimal128(d) => write!(f, "{d}"),
            StorageValue::ObjectId(id) => write!(f, "{id}"),
            StorageValue::Uuid(u) => write!(f, "{u}"),
            StorageValue::Link(link) => write!(f, "{link}"),
            StorageValue::List => f.write_str("[list]"),
            StorageValue::Dictionary => f.write_str("[dictionary]"),
        }
    }
}

impl From<i64> for StorageValue {
    fn from(n: i64) -> Self {
        StorageValue::Int(n)
    }
}

impl From<bool> for StorageValue {
    fn from(b: bool) -> Self {
        StorageValue::Bool(b)
    }
}

impl From<&str> for StorageValue {
    fn from(s: &str) -> Self {
        StorageValue::String(s.to_string())
    }
}

impl From<String> for StorageValue {
    fn from(s: String) -> Self {
        StorageValue::String(s)
    }
}

impl From<Link> for StorageValue {
    fn from(link: Link) -> Self {
        StorageValue::Link(link)
    }
}

/// A link to an object row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Class of the target object.
    pub class: ClassKey,
    /// Key of the target object.
    pub key: ObjKey,
}

impl Link {
    /// Creates a link.
    #[must_use]
    pub const fn new(class: ClassKey, key: ObjKey) -> Self {
        Self { class, key }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.key)
    }
}

/// A point in time as seconds and nanoseconds since the Unix epoch.
///
/// Both components carry the same sign, matching the engine's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: i64,
    nanos: i32,
}

impl Timestamp {
    /// Creates a timestamp from its components.
    #[must_use]
    pub const fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            seconds: millis / 1000,
            nanos: ((millis % 1000) * 1_000_000) as i32,
        }
    }

    /// Seconds since the epoch.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        self.seconds
    }

    /// Nanosecond adjustment.
    #[must_use]
    pub const fn nanos(self) -> i32 {
        self.nanos
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.seconds, self.nanos)
    }
}

/// A 128-bit IEEE 754-2008 decimal in binary integer decimal encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal128 {
    low: u64,
    high: u64,
}

impl Decimal128 {
    const SIGN_BIT: u64 = 1 << 63;
    // Biased exponent 6176 (= 10^0) placed at bit 49 of the high word.
    const ZERO_EXPONENT: u64 = 0x3040_0000_0000_0000;
    const EXPONENT_MASK: u64 = 0x7FFE_0000_0000_0000;
    const HIGH_COEFFICIENT_MASK: u64 = 0x0001_FFFF_FFFF_FFFF;

    /// Creates a decimal from its raw bit halves.
    #[must_use]
    pub const fn from_bits(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    /// Creates an exact decimal from an integer.
    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        let sign = if value < 0 { Self::SIGN_BIT } else { 0 };
        Self {
            low: value.unsigned_abs(),
            high: Self::ZERO_EXPONENT | sign,
        }
    }

    /// Low 64 bits.
    #[must_use]
    pub const fn low(self) -> u64 {
        self.low
    }

    /// High 64 bits.
    #[must_use]
    pub const fn high(self) -> u64 {
        self.high
    }

    fn as_integer(self) -> Option<i128> {
        let unsigned_high = self.high & !Self::SIGN_BIT;
        if unsigned_high & Self::EXPONENT_MASK != Self::ZERO_EXPONENT
            || unsigned_high & Self::HIGH_COEFFICIENT_MASK != 0
        {
            return None;
        }
        let magnitude = i128::from(self.low);
        Some(if self.high & Self::SIGN_BIT != 0 {
            -magnitude
        } else {
            magnitude
        })
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_integer() {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "0x{:016x}{:016x}", self.high, self.low),
        }
    }
}

/// A 12-byte object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Creates an object id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = CodecError;

    fn from_str(s: &str) -> CodecResult<Self> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(CodecError::invalid_literal("ObjectId", s));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| CodecError::invalid_literal("ObjectId", s))?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_type_of_values() {
        assert_eq!(StorageValue::Int(1).property_type(), Some(PropertyType::Int));
        assert_eq!(
            StorageValue::from("x").property_type(),
            Some(PropertyType::String)
        );
        assert_eq!(StorageValue::Null.property_type(), None);
        assert_eq!(StorageValue::List.property_type(), None);
    }

    #[test]
    fn object_id_hex_roundtrip() {
        let id: ObjectId = "507f1f77bcf86cd799439011".parse().unwrap();
        assert_eq!(id.to_string(), "507f1f77bcf86cd799439011");
        assert_eq!(id.as_bytes()[0], 0x50);
    }

    #[test]
    fn object_id_rejects_bad_input() {
        assert!("xyz".parse::<ObjectId>().is_err());
        assert!("zz7f1f77bcf86cd799439011".parse::<ObjectId>().is_err());
    }

    #[test]
    fn decimal_from_integer_displays_exactly() {
        assert_eq!(Decimal128::from_i64(42).to_string(), "42");
        assert_eq!(Decimal128::from_i64(-7).to_string(), "-7");
        assert_eq!(Decimal128::from_i64(0).to_string(), "0");
    }

    #[test]
    fn decimal_non_integer_displays_bits() {
        let d = Decimal128::from_bits(1, 0x3000_0000_0000_0000);
        assert_eq!(d.to_string(), "0x30000000000000000000000000000001");
    }

    #[test]
    fn timestamp_from_millis() {
        let ts = Timestamp::from_millis(1_500);
        assert_eq!(ts.seconds(), 1);
        assert_eq!(ts.nanos(), 500_000_000);
        assert!(Timestamp::new(1, 0) < Timestamp::new(2, 0));
    }

    #[test]
    fn link_display() {
        let link = Link::new(ClassKey::new(1), ObjKey::new(5));
        assert_eq!(StorageValue::from(link).to_string(), "class:1/obj:5");
    }
}
