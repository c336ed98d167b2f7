//! Tagged scalar value.
//!
//! Variants: `{bool, int32, int64, float32, float64, string, link(Identifier),
//! tag(string-without-backticks), timestamp}`. Each carries a type tag byte
//! and a canonical byte form. Ordering is by tag, then by type-natural order;
//! comparing two different tags falls back to the tag's numeric order,
//! giving a single total order across all variants.

use std::io::Write;

use crate::byteable::Byteable;
use crate::error::{KernelError, Result};
use crate::model::identifier::Identifier;
use crate::model::text::Text;

const TAG_BOOL: u8 = 0;
const TAG_INT32: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_FLOAT32: u8 = 3;
const TAG_FLOAT64: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_LINK: u8 = 6;
const TAG_TAG: u8 = 7;
const TAG_TIMESTAMP: u8 = 8;

/// A tagged scalar. `Link` carries a record [`Identifier`]; `Timestamp` is
/// microseconds since the epoch, matching the `version` clock in
/// [`crate::revision`].
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(Text),
    Link(Identifier),
    /// Free-form tag string; the payload must not contain a backtick.
    Tag(Text),
    Timestamp(i64),
}

impl Value {
    fn tag_byte(&self) -> u8 {
        match self {
            Value::Bool(_) => TAG_BOOL,
            Value::Int32(_) => TAG_INT32,
            Value::Int64(_) => TAG_INT64,
            Value::Float32(_) => TAG_FLOAT32,
            Value::Float64(_) => TAG_FLOAT64,
            Value::String(_) => TAG_STRING,
            Value::Link(_) => TAG_LINK,
            Value::Tag(_) => TAG_TAG,
            Value::Timestamp(_) => TAG_TIMESTAMP,
        }
    }

    /// Construct a `Tag` value, rejecting payloads containing a backtick.
    pub fn tag(s: impl Into<Text>) -> Result<Self> {
        let t = s.into();
        if t.as_str().contains('`') {
            return Err(KernelError::TypeError(format!(
                "tag value must not contain a backtick: {t}"
            )));
        }
        Ok(Value::Tag(t))
    }

    /// Collapse numeric widening so that equality-key lookups are
    /// type-agnostic across widths within the same numeric family: `Int32`
    /// widens to `Int64`, `Float32` widens to `Float64`. Used by
    /// `IndexChunk::insert` so `age = 30` (stored as an `Int32`) and
    /// `age = 30i64` resolve to the same index entry. Every other variant
    /// is returned unchanged.
    pub fn optimize(self) -> Value {
        match self {
            Value::Int32(v) => Value::Int64(v as i64),
            Value::Float32(v) => Value::Float64(v as f64),
            other => other,
        }
    }

    /// Parse a tagged value from its canonical byte form.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(KernelError::CorruptChunk("value has no tag byte".into()));
        }
        let tag = bytes[0];
        let payload = &bytes[1..];
        let value = match tag {
            TAG_BOOL => {
                if payload.is_empty() {
                    return Err(KernelError::CorruptChunk("bool value truncated".into()));
                }
                Value::Bool(payload[0] != 0)
            }
            TAG_INT32 => {
                let b: [u8; 4] = payload
                    .get(0..4)
                    .ok_or_else(|| KernelError::CorruptChunk("int32 value truncated".into()))?
                    .try_into()
                    .unwrap();
                Value::Int32(i32::from_be_bytes(b))
            }
            TAG_INT64 => {
                let b: [u8; 8] = payload
                    .get(0..8)
                    .ok_or_else(|| KernelError::CorruptChunk("int64 value truncated".into()))?
                    .try_into()
                    .unwrap();
                Value::Int64(i64::from_be_bytes(b))
            }
            TAG_FLOAT32 => {
                let b: [u8; 4] = payload
                    .get(0..4)
                    .ok_or_else(|| KernelError::CorruptChunk("float32 value truncated".into()))?
                    .try_into()
                    .unwrap();
                Value::Float32(f32::from_bits(u32::from_be_bytes(b)))
            }
            TAG_FLOAT64 => {
                let b: [u8; 8] = payload
                    .get(0..8)
                    .ok_or_else(|| KernelError::CorruptChunk("float64 value truncated".into()))?
                    .try_into()
                    .unwrap();
                Value::Float64(f64::from_bits(u64::from_be_bytes(b)))
            }
            TAG_STRING => Value::String(Text::load(payload)?),
            TAG_LINK => {
                let b: [u8; 8] = payload
                    .get(0..8)
                    .ok_or_else(|| KernelError::CorruptChunk("link value truncated".into()))?
                    .try_into()
                    .unwrap();
                Value::Link(Identifier::new(i64::from_be_bytes(b)))
            }
            TAG_TAG => Value::Tag(Text::load(payload)?),
            TAG_TIMESTAMP => {
                let b: [u8; 8] = payload
                    .get(0..8)
                    .ok_or_else(|| KernelError::CorruptChunk("timestamp value truncated".into()))?
                    .try_into()
                    .unwrap();
                Value::Timestamp(i64::from_be_bytes(b))
            }
            other => {
                return Err(KernelError::CorruptChunk(format!(
                    "unknown value tag byte: {other}"
                )))
            }
        };
        Ok(value)
    }
}

impl Byteable for Value {
    fn copy_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&[self.tag_byte()])?;
        match self {
            Value::Bool(b) => sink.write_all(&[*b as u8])?,
            Value::Int32(v) => sink.write_all(&v.to_be_bytes())?,
            Value::Int64(v) => sink.write_all(&v.to_be_bytes())?,
            Value::Float32(v) => sink.write_all(&v.to_bits().to_be_bytes())?,
            Value::Float64(v) => sink.write_all(&v.to_bits().to_be_bytes())?,
            Value::String(t) => t.copy_to(sink)?,
            Value::Link(id) => id.copy_to(sink)?,
            Value::Tag(t) => t.copy_to(sink)?,
            Value::Timestamp(v) => sink.write_all(&v.to_be_bytes())?,
        }
        Ok(())
    }

    fn size(&self) -> usize {
        1 + match self {
            Value::Bool(_) => 1,
            Value::Int32(_) => 4,
            Value::Int64(_) => 8,
            Value::Float32(_) => 4,
            Value::Float64(_) => 8,
            Value::String(t) => t.size(),
            Value::Link(id) => id.size(),
            Value::Tag(t) => t.size(),
            Value::Timestamp(_) => 8,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Ordering is by tag, then by type-natural order. Two values of
    /// different tags compare by tag byte, giving a single total order
    /// across every variant.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        let tag_cmp = self.tag_byte().cmp(&other.tag_byte());
        if tag_cmp != Ordering::Equal {
            return tag_cmp;
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float32(a), Value::Float32(b)) => a.total_cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Link(a), Value::Link(b)) => a.cmp(b),
            (Value::Tag(a), Value::Tag(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => unreachable!("tag_cmp already equal implies same variant"),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(t) => write!(f, "{t}"),
            Value::Link(id) => write!(f, "@{id}"),
            Value::Tag(t) => write!(f, "`{t}`"),
            Value::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_variant() {
        let values = vec![
            Value::Bool(true),
            Value::Int32(-7),
            Value::Int64(i64::MIN),
            Value::Float32(1.5),
            Value::Float64(-2.25),
            Value::String(Text::new("hi")),
            Value::Link(Identifier::new(42)),
            Value::tag("vip").unwrap(),
            Value::Timestamp(1_700_000_000_000_000),
        ];
        for v in values {
            let bytes = v.to_bytes();
            let loaded = Value::load(&bytes).unwrap();
            assert_eq!(v, loaded);
            assert_eq!(bytes.len(), v.size());
        }
    }

    #[test]
    fn tag_rejects_backtick() {
        assert!(Value::tag("no`backtick").is_err());
    }

    #[test]
    fn optimize_collapses_int_widths() {
        let a = Value::Int32(5).optimize();
        let b = Value::Int64(5).optimize();
        assert_eq!(a, b);
    }

    #[test]
    fn optimize_collapses_float_widths() {
        let a = Value::Float32(2.5).optimize();
        let b = Value::Float64(2.5).optimize();
        assert_eq!(a, b);
    }

    #[test]
    fn optimize_leaves_other_variants_unchanged() {
        let s = Value::String(Text::new("x"));
        assert_eq!(s.clone().optimize(), s);
    }

    #[test]
    fn total_tag_order_separates_variants() {
        assert!(Value::Bool(true) < Value::Int32(0));
        assert!(Value::Int64(i64::MAX) < Value::Float32(0.0));
        assert!(Value::String(Text::new("")) < Value::Link(Identifier::new(0)));
    }

    #[test]
    fn natural_order_within_variant() {
        assert!(Value::Int64(1) < Value::Int64(2));
        assert!(Value::String(Text::new("a")) < Value::String(Text::new("b")));
    }
}
