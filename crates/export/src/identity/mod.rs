//! Identity cache and reference tokens
//!
//! Shared sub-objects are materialized once per job. The first caller to
//! register an identity materializes the value; every later caller, including
//! one reached through a cycle while the first is still materializing, emits a
//! [`ReferenceToken`] instead.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// BLAKE3 digest of a canonical byte representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Digest of several parts, each length-prefixed so part boundaries count
    pub fn of_parts<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Stable key of a shared object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Native row identifier within a table namespace
    Row { namespace: &'static str, id: i64 },
    /// Externally assigned identifier (e.g. a gml:id)
    External(String),
    /// Content-derived key for objects without a native identifier
    Content(ContentDigest),
}

impl IdentityKey {
    pub fn row(namespace: &'static str, id: i64) -> Self {
        IdentityKey::Row { namespace, id }
    }

    pub fn external(id: impl Into<String>) -> Self {
        IdentityKey::External(id.into())
    }

    pub fn content(bytes: &[u8]) -> Self {
        IdentityKey::Content(ContentDigest::of(bytes))
    }

    /// Identifier the first emitted object carries, so tokens for this key
    /// resolve to it. Keys without an external id get a `UUID_` digest.
    pub fn object_id(&self) -> String {
        match self {
            IdentityKey::External(id) => id.clone(),
            IdentityKey::Content(digest) => format!("UUID_{}", digest),
            IdentityKey::Row { namespace, id } => {
                let id = id.to_le_bytes();
                format!("UUID_{}", ContentDigest::of_parts([namespace.as_bytes(), id.as_slice()]))
            }
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Row { namespace, id } => write!(f, "{}:{}", namespace, id),
            IdentityKey::External(id) => write!(f, "{}", id),
            IdentityKey::Content(digest) => write!(f, "UUID_{}", digest),
        }
    }
}

/// Lightweight stand-in for a value emitted elsewhere in the same job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ReferenceToken(String);

impl ReferenceToken {
    /// `#` + external id
    pub fn external(id: &str) -> Self {
        Self(format!("#{}", id))
    }

    /// `#UUID_` + hex digest
    pub fn content(digest: &ContentDigest) -> Self {
        Self(format!("#UUID_{}", digest))
    }

    /// Token pointing at the object that carries `key.object_id()`
    pub fn for_key(key: &IdentityKey) -> Self {
        Self::external(&key.object_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier the token points at, without the leading `#`
    pub fn target(&self) -> &str {
        self.0.trim_start_matches('#')
    }
}

impl fmt::Display for ReferenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a registered identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Geometry,
    ImplicitGeometry,
    Appearance,
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
    id: Option<i64>,
    kind: IdentityKind,
}

/// Identity cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityStats {
    pub registered: usize,
    pub repeated: usize,
    pub by_kind: HashMap<IdentityKind, usize>,
}

/// Job-scoped map of identities already materialized (or being materialized)
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<IdentityKey, Registration>,
    repeated: usize,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key`, returning whether it was already seen.
    ///
    /// When this returns `true` the caller emits a reference token. When it
    /// returns `false` the identity is registered before the caller starts
    /// materializing, so cycles back to it resolve to tokens.
    pub fn lookup_or_register(&mut self, key: IdentityKey, id: Option<i64>, kind: IdentityKind) -> bool {
        if self.entries.contains_key(&key) {
            self.repeated += 1;
            tracing::trace!("Identity {} already registered", key);
            return true;
        }

        self.entries.insert(key, Registration { id, kind });
        false
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Row id and kind a key was registered with
    pub fn get(&self, key: &IdentityKey) -> Option<(Option<i64>, IdentityKind)> {
        self.entries.get(key).map(|registration| (registration.id, registration.kind))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IdentityStats {
        let mut by_kind = HashMap::new();
        for registration in self.entries.values() {
            *by_kind.entry(registration.kind).or_insert(0) += 1;
        }
        IdentityStats {
            registered: self.entries.len(),
            repeated: self.repeated,
            by_kind,
        }
    }

    /// Forget every identity, returning how many were registered
    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        self.repeated = 0;
        tracing::debug!("Identity cache cleared ({} identities)", cleared);
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_registration_is_seen() {
        let mut cache = IdentityCache::new();
        assert!(!cache.lookup_or_register(IdentityKey::external("geom-42"), Some(42), IdentityKind::Geometry));
        assert!(cache.lookup_or_register(IdentityKey::external("geom-42"), Some(42), IdentityKind::Geometry));

        let token = ReferenceToken::for_key(&IdentityKey::external("geom-42"));
        assert_eq!(token.as_str(), "#geom-42");
        assert_eq!(token.target(), "geom-42");

        let stats = cache.stats();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.repeated, 1);
        assert_eq!(stats.by_kind[&IdentityKind::Geometry], 1);
    }

    #[test]
    fn test_key_namespaces_are_distinct() {
        let mut cache = IdentityCache::new();
        assert!(!cache.lookup_or_register(IdentityKey::row("geometry", 7), Some(7), IdentityKind::Geometry));
        assert!(!cache.lookup_or_register(
            IdentityKey::row("implicit_geometry", 7),
            Some(7),
            IdentityKind::ImplicitGeometry
        ));
        assert!(!cache.lookup_or_register(IdentityKey::external("7"), None, IdentityKind::Feature));
        assert_eq!(cache.len(), 3);
        assert_eq!(
            cache.get(&IdentityKey::row("geometry", 7)),
            Some((Some(7), IdentityKind::Geometry))
        );
    }

    #[test]
    fn test_content_digest_tokens() {
        let first = ContentDigest::of(b"library/tree.3ds");
        let second = ContentDigest::of(b"library/tree.3ds");
        assert_eq!(first, second);
        assert_eq!(first.to_hex().len(), 64);

        let token = ReferenceToken::content(&first);
        assert!(token.as_str().starts_with("#UUID_"));
        assert_eq!(token, ReferenceToken::for_key(&IdentityKey::Content(second)));
    }

    #[test]
    fn test_row_keys_get_uuid_ids() {
        let key = IdentityKey::row("implicit_geometry", 7);
        let object_id = key.object_id();
        assert!(object_id.starts_with("UUID_"));
        assert_eq!(object_id, IdentityKey::row("implicit_geometry", 7).object_id());
        assert_ne!(object_id, IdentityKey::row("geometry", 7).object_id());

        let token = ReferenceToken::for_key(&key);
        assert_eq!(token.target(), object_id);
        assert_eq!(IdentityKey::external("geom-42").object_id(), "geom-42");
    }

    #[test]
    fn test_part_boundaries_change_digest() {
        let joined = ContentDigest::of_parts([b"ab".as_slice(), b"c".as_slice()]);
        let split = ContentDigest::of_parts([b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(joined, split);
    }

    #[test]
    fn test_clear() {
        let mut cache = IdentityCache::new();
        cache.lookup_or_register(IdentityKey::external("a"), None, IdentityKind::Appearance);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
        assert!(!cache.lookup_or_register(IdentityKey::external("a"), None, IdentityKind::Appearance));
    }
}
