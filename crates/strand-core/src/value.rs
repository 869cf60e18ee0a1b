//! Fact values and their type codes.
//!
//! [`Value`] is the closed set of things a fact can hold. Every variant has a
//! total order so any value can sit in the index's sorted `(attr, value,
//! entity)` structure: variants rank by kind first, and the three integer
//! kinds share one rank and compare numerically.
//!
//! [`TypeCode`] is the single byte stored on an attribute: the primitive
//! [`ValueType`] in the low bits plus the list and ref flags.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::id::Gid;

/// Fixed-point decimal: `unscaled * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
    pub unscaled: i64,
    pub scale: u8,
}

impl Decimal {
    pub fn new(unscaled: i64, scale: u8) -> Self {
        Decimal { unscaled, scale }
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        // Bring both to the larger scale in i128; scale is capped by u8 but
        // anything past 10^38 saturates, which only affects absurd inputs.
        let scale = self.scale.max(other.scale);
        let widen = |d: &Decimal| {
            let factor = 10i128.saturating_pow(u32::from(scale - d.scale));
            i128::from(d.unscaled).saturating_mul(factor)
        };
        widen(self)
            .cmp(&widen(other))
            .then(self.scale.cmp(&other.scale))
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.unscaled);
        }
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let digits = self.unscaled.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int}.{frac}")
    }
}

/// A fact value.
///
/// Equality is the order's equality: zoned times with the same instant but
/// different offsets are distinct values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int(i32),
    Long(i64),
    Str(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Instant(DateTime<Utc>),
    Zoned(DateTime<FixedOffset>),
    Ref(Gid),
}

impl Value {
    /// The primitive type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Byte(_) => ValueType::Byte,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Str(_) => ValueType::Str,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Decimal(_) => ValueType::Decimal,
            Value::Instant(_) => ValueType::Instant,
            Value::Zoned(_) => ValueType::Zoned,
            Value::Ref(_) => ValueType::Ref,
        }
    }

    pub fn as_ref_gid(&self) -> Option<Gid> {
        match self {
            Value::Ref(gid) => Some(*gid),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Any integer kind widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts an integer value to another integer kind when it fits.
    ///
    /// Non-integer values, and integers that don't fit, come back unchanged.
    pub fn coerce_to(self, ty: ValueType) -> Value {
        let Some(n) = self.as_i64() else {
            return self;
        };
        match ty {
            ValueType::Byte => u8::try_from(n).map(Value::Byte).unwrap_or(self),
            ValueType::Int => i32::try_from(n).map(Value::Int).unwrap_or(self),
            ValueType::Long => Value::Long(n),
            _ => self,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Byte(_) | Value::Int(_) | Value::Long(_) => 1,
            Value::Decimal(_) => 2,
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
            Value::Instant(_) => 5,
            Value::Zoned(_) => 6,
            Value::Ref(_) => 7,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Instant(a), Value::Instant(b)) => a.cmp(b),
            (Value::Zoned(a), Value::Zoned(b)) => a
                .cmp(b)
                .then_with(|| a.offset().local_minus_utc().cmp(&b.offset().local_minus_utc())),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            // Integers: numeric first, kind as tie-break so Ord agrees with Eq.
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x
                    .cmp(&y)
                    .then(a.value_type().code().cmp(&b.value_type().code())),
                _ => Ordering::Equal,
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().code().hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::Byte(_) | Value::Int(_) | Value::Long(_) => self.as_i64().hash(state),
            Value::Str(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Decimal(v) => v.hash(state),
            Value::Instant(v) => v.hash(state),
            Value::Zoned(v) => {
                v.hash(state);
                v.offset().local_minus_utc().hash(state);
            }
            Value::Ref(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}b"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}L"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
            Value::Decimal(v) => write!(f, "{v}M"),
            Value::Instant(v) => write!(f, "#inst {}", v.to_rfc3339()),
            Value::Zoned(v) => write!(f, "#zoned {}", v.to_rfc3339()),
            Value::Ref(v) => write!(f, "#ref {v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Gid> for Value {
    fn from(v: Gid) -> Self {
        Value::Ref(v)
    }
}

/// Primitive value types, with their stable one-byte codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Byte,
    Int,
    Long,
    Str,
    Bytes,
    Decimal,
    Instant,
    Zoned,
    Ref,
}

impl ValueType {
    pub const fn code(self) -> u8 {
        match self {
            ValueType::Bool => 1,
            ValueType::Byte => 2,
            ValueType::Int => 3,
            ValueType::Long => 4,
            ValueType::Str => 5,
            ValueType::Bytes => 6,
            ValueType::Decimal => 7,
            ValueType::Instant => 8,
            ValueType::Zoned => 9,
            ValueType::Ref => 10,
        }
    }

    pub fn from_code(code: u8) -> Option<ValueType> {
        Some(match code {
            1 => ValueType::Bool,
            2 => ValueType::Byte,
            3 => ValueType::Int,
            4 => ValueType::Long,
            5 => ValueType::Str,
            6 => ValueType::Bytes,
            7 => ValueType::Decimal,
            8 => ValueType::Instant,
            9 => ValueType::Zoned,
            10 => ValueType::Ref,
            _ => return None,
        })
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ValueType::Byte | ValueType::Int | ValueType::Long)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Byte => "byte",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Str => "string",
            ValueType::Bytes => "bytes",
            ValueType::Decimal => "decimal",
            ValueType::Instant => "instant",
            ValueType::Zoned => "zoned",
            ValueType::Ref => "ref",
        };
        f.write_str(name)
    }
}

/// The attribute type byte: primitive code | LIST | REF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeCode(pub u8);

impl TypeCode {
    const TYPE_MASK: u8 = 0x1f;
    pub const LIST: u8 = 0x20;
    pub const REF: u8 = 0x40;

    pub fn new(ty: ValueType, is_list: bool) -> Self {
        let mut code = ty.code();
        if is_list {
            code |= Self::LIST;
        }
        if ty == ValueType::Ref {
            code |= Self::REF;
        }
        TypeCode(code)
    }

    pub fn value_type(self) -> Option<ValueType> {
        ValueType::from_code(self.0 & Self::TYPE_MASK)
    }

    pub fn is_list(self) -> bool {
        self.0 & Self::LIST != 0
    }

    pub fn is_ref(self) -> bool {
        self.0 & Self::REF != 0
    }
}
