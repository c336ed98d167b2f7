//! Revision: the atomic, immutable unit of storage.
//!
//! Three shapes share one contract — `(locator, key, value, version, action)`
//! plus a canonical encoding and the `(locator, key, version, value)` sort
//! comparator:
//!
//! - `TableRevision`: locator=Identifier, key=Text, value=Value
//! - `IndexRevision`: locator=Text, key=Value, value=Identifier
//! - `CorpusRevision`: locator=Text (field), key=Text (substring), value=Position
//!
//! Encoding is `(locator-bytes | key-bytes | value-bytes | version:u64 |
//! action:u8)`, each component 4-byte-length-prefixed; `action` is 1 for ADD,
//! 2 for REMOVE.

use std::io::Write as IoWrite;

use crate::byteable::{Byteable, Composite};
use crate::error::{KernelError, Result};
use crate::model::{Identifier, Position, Text, Value};

/// Whether a revision establishes or retracts presence of `(L, K, V)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Add,
    Remove,
}

impl Action {
    pub fn byte(&self) -> u8 {
        match self {
            Action::Add => 1,
            Action::Remove => 2,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Action::Add),
            2 => Ok(Action::Remove),
            other => Err(KernelError::CorruptChunk(format!(
                "unknown action byte: {other}"
            ))),
        }
    }

    /// ADD becomes REMOVE and vice versa.
    pub fn inverse(self) -> Self {
        match self {
            Action::Add => Action::Remove,
            Action::Remove => Action::Add,
        }
    }
}

fn write_length_prefixed<W: IoWrite>(sink: &mut W, bytes: &[u8]) -> Result<()> {
    sink.write_all(&(bytes.len() as u32).to_be_bytes())?;
    sink.write_all(bytes)?;
    Ok(())
}

/// Shared contract over the three revision shapes: a canonical encoding,
/// a `(locator, key, version, value)` sort order, and the three
/// locating composites `(L)`, `(L,K)`, `(L,K,V)` that a [`crate::chunk`]
/// updates its bloom filter and manifest with.
pub trait RevisionLike: Byteable + Ord + Clone + Send + Sync + 'static {
    /// `((L), (L,K), (L,K,V))`, in that order.
    fn composites(&self) -> (Composite, Composite, Composite);
    fn version(&self) -> u64;
    fn action(&self) -> Action;
    fn load_from_bytes(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

fn read_length_prefixed(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    if *pos + 4 > bytes.len() {
        return Err(KernelError::CorruptChunk(
            "revision truncated reading component length".into(),
        ));
    }
    let len = u32::from_be_bytes(bytes[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if *pos + len > bytes.len() {
        return Err(KernelError::CorruptChunk(
            "revision truncated reading component bytes".into(),
        ));
    }
    let out = bytes[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

macro_rules! revision_shape {
    ($name:ident, $locator_ty:ty, $key_ty:ty, $value_ty:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            locator: $locator_ty,
            key: $key_ty,
            value: $value_ty,
            version: u64,
            action: Action,
        }

        impl $name {
            pub fn new(
                locator: $locator_ty,
                key: $key_ty,
                value: $value_ty,
                version: u64,
                action: Action,
            ) -> Self {
                Self {
                    locator,
                    key,
                    value,
                    version,
                    action,
                }
            }

            pub fn locator(&self) -> &$locator_ty {
                &self.locator
            }

            pub fn key(&self) -> &$key_ty {
                &self.key
            }

            pub fn value(&self) -> &$value_ty {
                &self.value
            }

            pub fn version(&self) -> u64 {
                self.version
            }

            pub fn action(&self) -> Action {
                self.action
            }

            pub fn is_add(&self) -> bool {
                self.action == Action::Add
            }

            /// `((L), (L,K), (L,K,V))` composites, used to update a
            /// chunk's bloom filter and manifest group boundaries.
            pub fn composites(&self) -> (Composite, Composite, Composite) {
                let l = self.locator.to_bytes();
                let k = self.key.to_bytes();
                let v = self.value.to_bytes();
                (
                    Composite::create(&[&l]),
                    Composite::create(&[&l, &k]),
                    Composite::create(&[&l, &k, &v]),
                )
            }

            /// Parse a revision from its canonical encoding.
            pub fn load(bytes: &[u8]) -> Result<Self> {
                let mut pos = 0usize;
                let locator = <$locator_ty>::load(&read_length_prefixed(bytes, &mut pos)?)?;
                let key = <$key_ty>::load(&read_length_prefixed(bytes, &mut pos)?)?;
                let value = <$value_ty>::load(&read_length_prefixed(bytes, &mut pos)?)?;
                if pos + 9 > bytes.len() {
                    return Err(KernelError::CorruptChunk(
                        "revision truncated reading version/action".into(),
                    ));
                }
                let version = u64::from_be_bytes(bytes[pos..pos + 8].try_into().unwrap());
                pos += 8;
                let action = Action::from_byte(bytes[pos])?;
                Ok(Self::new(locator, key, value, version, action))
            }
        }

        impl Byteable for $name {
            fn copy_to<W: IoWrite>(&self, sink: &mut W) -> Result<()> {
                write_length_prefixed(sink, &self.locator.to_bytes())?;
                write_length_prefixed(sink, &self.key.to_bytes())?;
                write_length_prefixed(sink, &self.value.to_bytes())?;
                sink.write_all(&self.version.to_be_bytes())?;
                sink.write_all(&[self.action.byte()])?;
                Ok(())
            }

            fn size(&self) -> usize {
                12 + self.locator.size() + self.key.size() + self.value.size() + 9
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        /// `(locator, key, version, value)` — the chunk sort comparator.
        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                (&self.locator, &self.key, &self.version, &self.value).cmp(&(
                    &other.locator,
                    &other.key,
                    &other.version,
                    &other.value,
                ))
            }
        }

        impl RevisionLike for $name {
            fn composites(&self) -> (Composite, Composite, Composite) {
                $name::composites(self)
            }

            fn version(&self) -> u64 {
                $name::version(self)
            }

            fn action(&self) -> Action {
                $name::action(self)
            }

            fn load_from_bytes(bytes: &[u8]) -> Result<Self> {
                $name::load(bytes)
            }
        }
    };
}

revision_shape!(
    TableRevision,
    Identifier,
    Text,
    Value,
    "`locator`=record, `key`=attribute name, `value`=stored value."
);
revision_shape!(
    IndexRevision,
    Text,
    Value,
    Identifier,
    "`locator`=attribute name, `key`=value, `value`=record."
);
revision_shape!(
    CorpusRevision,
    Text,
    Text,
    Position,
    "`locator`=field, `key`=substring term, `value`=(record, word index)."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_revision_roundtrips() {
        let r = TableRevision::new(
            Identifier::new(1),
            Text::new("name"),
            Value::String(Text::new("jeff")),
            100,
            Action::Add,
        );
        let bytes = r.to_bytes();
        assert_eq!(bytes.len(), r.size());
        let loaded = TableRevision::load(&bytes).unwrap();
        assert_eq!(r, loaded);
    }

    #[test]
    fn index_revision_roundtrips() {
        let r = IndexRevision::new(
            Text::new("name"),
            Value::String(Text::new("jeff")),
            Identifier::new(1),
            100,
            Action::Remove,
        );
        let loaded = IndexRevision::load(&r.to_bytes()).unwrap();
        assert_eq!(r, loaded);
    }

    #[test]
    fn corpus_revision_roundtrips() {
        let r = CorpusRevision::new(
            Text::new("bio"),
            Text::new("jef"),
            Position::new(Identifier::new(1), 0),
            100,
            Action::Add,
        );
        let loaded = CorpusRevision::load(&r.to_bytes()).unwrap();
        assert_eq!(r, loaded);
    }

    #[test]
    fn action_inverse_round_trips() {
        assert_eq!(Action::Add.inverse(), Action::Remove);
        assert_eq!(Action::Remove.inverse(), Action::Add);
    }

    #[test]
    fn sorts_by_locator_key_version_value() {
        let a = TableRevision::new(
            Identifier::new(1),
            Text::new("name"),
            Value::Int64(1),
            100,
            Action::Add,
        );
        let b = TableRevision::new(
            Identifier::new(1),
            Text::new("name"),
            Value::Int64(1),
            101,
            Action::Add,
        );
        let c = TableRevision::new(
            Identifier::new(2),
            Text::new("name"),
            Value::Int64(1),
            50,
            Action::Add,
        );
        assert!(a < b);
        assert!(b < c);
    }
}
