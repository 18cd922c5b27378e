//! Dict - hash-chained keyed value store
//!
//! The universal payload container: message bodies, listen options and actor
//! state all travel as a `Dict`. Keys are hashed with djb2 into a fixed number
//! of buckets chosen at construction; collisions chain inside the bucket.
//!
//! ```text
//! buckets[0] -> ("op", "ping") -> ("seq", 3)
//! buckets[1] -> (empty)
//! buckets[2] -> ("from", opaque:0x1)
//! ```
//!
//! Overwriting a key replaces the value in place: the node keeps its bucket and
//! its position in the chain, so iteration order only changes on insertion.

use crate::error::{Result, StoreError};
use crate::value::{OpaqueHandle, Value};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Bucket count used by [`Dict::default`]; payloads are small and fixed-shape
pub const DEFAULT_BUCKETS: usize = 16;

#[derive(Clone)]
struct Node {
    key: String,
    value: Value,
}

/// djb2 (`hash * 33 + byte`) masked to 31 bits
#[inline]
fn hash_key(key: &str) -> u32 {
    let mut hash: u32 = 5381;
    for &byte in key.as_bytes() {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(u32::from(byte));
    }
    hash & 0x7FFF_FFFF
}

/// Hash-chained map from string keys to [`Value`]s
#[derive(Clone)]
pub struct Dict {
    buckets: Vec<Vec<Node>>,
    len: usize,
}

/// Resumable position inside a [`Dict`]
///
/// A cursor is plain data: it can be stored, copied and resumed later with
/// [`Dict::next_entry`]. Resuming after the dict was mutated is safe but may
/// skip or repeat entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DictCursor {
    bucket: usize,
    position: usize,
}

impl DictCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the first entry
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKETS)
    }
}

impl Dict {
    /// Create an empty dict; a bucket count of 0 is treated as 1
    pub fn new(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, Vec::new);
        Self { buckets, len: 0 }
    }

    /// Build a dict from key/value pairs
    pub fn with_entries<K, V, I>(entries: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut dict = Self::default();
        for (key, value) in entries {
            dict.set(key.as_ref(), value)?;
        }
        Ok(dict)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn bucket_of(&self, key: &str) -> usize {
        hash_key(key) as usize % self.buckets.len()
    }

    /// Store `value` under `key` and return the stored slot.
    ///
    /// An existing key keeps its node; only the value is replaced. On
    /// allocation failure nothing is inserted.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<&mut Value> {
        let value = value.into();
        let index = self.bucket_of(key);
        let bucket = &mut self.buckets[index];

        if let Some(position) = bucket.iter().position(|node| node.key == key) {
            let slot = &mut bucket[position].value;
            *slot = value;
            return Ok(slot);
        }

        bucket
            .try_reserve(1)
            .map_err(|_| StoreError::allocation_failed(format!("dict node for '{}'", key)))?;
        let mut owned_key = String::new();
        owned_key
            .try_reserve_exact(key.len())
            .map_err(|_| StoreError::allocation_failed(format!("dict key '{}'", key)))?;
        owned_key.push_str(key);

        let position = bucket.len();
        bucket.push(Node {
            key: owned_key,
            value,
        });
        self.len += 1;
        Ok(&mut bucket[position].value)
    }

    pub fn set_number(&mut self, key: &str, n: f64) -> Result<&mut Value> {
        self.set(key, Value::Number(n))
    }

    pub fn set_str(&mut self, key: &str, s: &str) -> Result<&mut Value> {
        self.set(key, Value::from(s))
    }

    pub fn set_opaque(&mut self, key: &str, handle: impl Into<OpaqueHandle>) -> Result<&mut Value> {
        self.set(key, Value::Opaque(handle.into()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.buckets[self.bucket_of(key)]
            .iter()
            .find(|node| node.key == key)
            .map(|node| &node.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        let index = self.bucket_of(key);
        self.buckets[index]
            .iter_mut()
            .find(|node| node.key == key)
            .map(|node| &mut node.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// String value under `key`, if present and UTF-8
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_number)
    }

    pub fn get_opaque(&self, key: &str) -> Option<OpaqueHandle> {
        self.get(key).and_then(Value::as_opaque)
    }

    /// Typed number lookup reporting a mismatch instead of hiding it
    pub fn require_number(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(*n)),
            Some(other) => Err(StoreError::invalid_value(key, "number", other.type_name())),
        }
    }

    /// Copy every entry of `other` into `self`, overwriting shared keys
    pub fn merge_from(&mut self, other: &Dict) -> Result<()> {
        for (key, value) in other.iter() {
            self.set(key, value.clone())?;
        }
        Ok(())
    }

    /// Advance `cursor` and return the entry it passed over
    pub fn next_entry(&self, cursor: &mut DictCursor) -> Option<(&str, &Value)> {
        while let Some(bucket) = self.buckets.get(cursor.bucket) {
            if let Some(node) = bucket.get(cursor.position) {
                cursor.position += 1;
                return Some((node.key.as_str(), &node.value));
            }
            cursor.bucket += 1;
            cursor.position = 0;
        }
        None
    }

    /// Iterate entries in bucket-then-chain order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            dict: self,
            cursor: DictCursor::new(),
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().map(|(key, _)| key)
    }
}

/// Borrowing iterator over a [`Dict`]
pub struct Iter<'a> {
    dict: &'a Dict,
    cursor: DictCursor,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.dict.next_entry(&mut self.cursor)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Dict {
    type Item = (&'a str, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Structural equality: same keys with equal values, regardless of bucket
/// count or chain order
impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().all(|(key, value)| other.get(key) == Some(value))
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Serialize for Dict {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct DictVisitor;

impl<'de> Visitor<'de> for DictVisitor {
    type Value = Dict;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of string keys to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Dict, A::Error> {
        let mut dict = Dict::default();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            dict.set(&key, value).map_err(serde::de::Error::custom)?;
        }
        Ok(dict)
    }
}

impl<'de> Deserialize<'de> for Dict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DictVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_matches_djb2() {
        // djb2("") is the seed, djb2("a") = 5381 * 33 + 97
        assert_eq!(hash_key(""), 5381);
        assert_eq!(hash_key("a"), 5381 * 33 + 97);
        assert!(hash_key("a considerably longer key to overflow the hash") <= 0x7FFF_FFFF);
    }

    #[test]
    fn test_hash_reads_bytes_unsigned() {
        // "é" is 0xC3 0xA9 in UTF-8
        assert_eq!(hash_key("é"), (5381 * 33 + 0xC3) * 33 + 0xA9);

        let mut dict = Dict::new(4);
        dict.set("clé", 1).unwrap();
        dict.set("ключ", 2).unwrap();
        assert_eq!(dict.get_number("clé"), Some(1.0));
        assert_eq!(dict.get_number("ключ"), Some(2.0));
        assert_eq!(dict.get_number("cle"), None);
    }

    #[test]
    fn test_set_and_get() {
        let mut dict = Dict::new(5);
        dict.set("op", "ping").unwrap();
        dict.set_number("seq", 3.0).unwrap();
        dict.set_opaque("from", OpaqueHandle(1)).unwrap();

        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get_str("op"), Some("ping"));
        assert_eq!(dict.get_number("seq"), Some(3.0));
        assert_eq!(dict.get_opaque("from"), Some(OpaqueHandle(1)));
        assert!(dict.get("missing").is_none());
    }

    #[test]
    fn test_overwrite_keeps_node_and_position() {
        let mut dict = Dict::new(1);
        dict.set("a", 1).unwrap();
        dict.set("b", 2).unwrap();
        dict.set("c", 3).unwrap();
        let before: Vec<String> = dict.keys().map(str::to_string).collect();

        dict.set("b", "two").unwrap();

        let after: Vec<String> = dict.keys().map(str::to_string).collect();
        assert_eq!(before, after);
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get_str("b"), Some("two"));
    }

    #[test]
    fn test_set_returns_stored_slot() {
        let mut dict = Dict::default();
        let slot = dict.set("count", 1).unwrap();
        *slot = Value::from(5);
        assert_eq!(dict.get("count").and_then(Value::as_i64), Some(5));
    }

    #[test]
    fn test_zero_buckets_clamped() {
        let mut dict = Dict::new(0);
        assert_eq!(dict.bucket_count(), 1);
        dict.set("k", 1).unwrap();
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_cursor_is_resumable() {
        let mut dict = Dict::new(3);
        for key in ["a", "b", "c", "d", "e"] {
            dict.set(key, key).unwrap();
        }

        let mut cursor = DictCursor::new();
        let first = dict.next_entry(&mut cursor).map(|(k, _)| k.to_string());
        let saved = cursor;

        let mut rest = Vec::new();
        while let Some((key, _)) = dict.next_entry(&mut cursor) {
            rest.push(key.to_string());
        }
        assert_eq!(rest.len(), 4);
        assert!(dict.next_entry(&mut cursor).is_none());

        let mut resumed = saved;
        let again = dict.next_entry(&mut resumed).map(|(k, _)| k.to_string());
        assert_eq!(again.as_deref(), rest.first().map(String::as_str));

        cursor.reset();
        assert_eq!(dict.next_entry(&mut cursor).map(|(k, _)| k.to_string()), first);
    }

    #[test]
    fn test_merge_preserves_unknown_keys() {
        let mut defaults = Dict::new(5);
        defaults.set("packet", 0).unwrap();

        let mut user = Dict::default();
        user.set("packet", 2).unwrap();
        user.set("nodelay", 1).unwrap();

        defaults.merge_from(&user).unwrap();
        assert_eq!(defaults.get("packet").and_then(Value::as_i64), Some(2));
        assert_eq!(defaults.get("nodelay").and_then(Value::as_i64), Some(1));
        assert_eq!(defaults.len(), 2);
    }

    #[test]
    fn test_structural_equality_ignores_layout() {
        let a = Dict::with_entries([("op", "pong"), ("who", "b")]).unwrap();
        let mut b = Dict::new(1);
        b.set("who", "b").unwrap();
        b.set("op", "pong").unwrap();
        assert_eq!(a, b);

        b.set("op", "ping").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = Dict::default();
        original.set("op", "ping").unwrap();
        let mut copy = original.clone();
        copy.set("op", "pong").unwrap();
        assert_eq!(original.get_str("op"), Some("ping"));
        assert_eq!(copy.get_str("op"), Some("pong"));
    }

    #[test]
    fn test_require_number() {
        let dict = Dict::with_entries([("packet", Value::from("lines"))]).unwrap();
        assert!(dict.require_number("packet").is_err());
        assert_eq!(dict.require_number("absent").unwrap(), None);
    }

    #[test]
    fn test_json_round_trip() {
        let mut dict = Dict::default();
        dict.set("op", "ping").unwrap();
        dict.set("seq", 7).unwrap();
        dict.set_opaque("conn", OpaqueHandle(3)).unwrap();

        let json = serde_json::to_string(&dict).unwrap();
        let parsed: Dict = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, dict);
    }
}
