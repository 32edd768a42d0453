//! Deterministic domain identifiers.
//!
//! An id is `tag#connectionId:key1:key2:...`. The tag names the tool-layer
//! entity type (`github:GithubJob`), so two plugins can only collide when they
//! describe the same entity type, connection and key tuple. Generation is a
//! pure function of its inputs: no randomness, no counters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A generated domain identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The entity tag this id was generated for.
    pub fn tag(&self) -> &str {
        self.0.split_once('#').map(|(tag, _)| tag).unwrap_or(&self.0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DomainId> for String {
    fn from(id: DomainId) -> Self {
        id.0
    }
}

/// Tool-layer types that domain ids can be generated for.
pub trait IdTag {
    /// `plugin:EntityName`, fixed per type.
    const ID_TAG: &'static str;
}

/// One component of an id's key tuple.
pub trait IdKey {
    fn write_key(&self, out: &mut String);
}

macro_rules! int_id_key {
    ($($t:ty),*) => {
        $(impl IdKey for $t {
            fn write_key(&self, out: &mut String) {
                out.push_str(&self.to_string());
            }
        })*
    };
}

int_id_key!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// Strings are escaped so a `:` inside a key can't shift the tuple boundary.
impl IdKey for str {
    fn write_key(&self, out: &mut String) {
        for c in self.chars() {
            match c {
                '%' => out.push_str("%25"),
                ':' => out.push_str("%3A"),
                '#' => out.push_str("%23"),
                c => out.push(c),
            }
        }
    }
}

impl IdKey for String {
    fn write_key(&self, out: &mut String) {
        self.as_str().write_key(out)
    }
}

/// Parent ids are escaped like strings, so their separators stay inside one
/// key component.
impl IdKey for DomainId {
    fn write_key(&self, out: &mut String) {
        self.0.write_key(out)
    }
}

impl<T: IdKey + ?Sized> IdKey for &T {
    fn write_key(&self, out: &mut String) {
        (**self).write_key(out)
    }
}

/// Generates ids for one entity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainIdGenerator {
    tag: String,
}

impl DomainIdGenerator {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    /// Generator for the tool-layer type `T`.
    pub fn for_entity<T: IdTag>() -> Self {
        Self::new(T::ID_TAG)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Id for one key tuple under this tag.
    ///
    /// Key components are written as text without a type marker, so `5u64`
    /// and `"5"` produce the same component. Distinct tuples map to distinct
    /// ids as long as every caller of a tag uses the same key schema.
    pub fn generate(&self, connection_id: u64, keys: &[&dyn IdKey]) -> DomainId {
        let mut out = String::with_capacity(self.tag.len() + 8 + keys.len() * 12);
        out.push_str(&self.tag);
        out.push('#');
        out.push_str(&connection_id.to_string());
        for key in keys {
            out.push(':');
            key.write_key(&mut out);
        }
        DomainId(out)
    }
}
