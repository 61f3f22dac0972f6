//! Identity tables.
//!
//! [`ObjectCache`] maps a host identity to the single live script wrapper for
//! it, for the lifetime of that wrapper. [`ConversionLookup`] is scoped to one
//! top-level script→host conversion and maps script objects that were already
//! converted to the host container produced for them, which is what makes
//! cyclic and shared structures terminate and keep their shape.
//!
//! Both are generic over the engine handle type so they carry no engine state
//! of their own.

use super::host_value::{HostValue, IdentityKey};
use super::registry::WrapperId;
use std::collections::HashMap;

struct CacheEntry<W> {
    wrapper: WrapperId,
    handle: W,
}

/// Host identity → live wrapper.
pub struct ObjectCache<W> {
    entries: HashMap<IdentityKey, CacheEntry<W>>,
}

impl<W> ObjectCache<W> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The cached wrapper handle for `identity`.
    pub fn get(&self, identity: &IdentityKey) -> Option<&W> {
        self.entries.get(identity).map(|entry| &entry.handle)
    }

    /// Cache `handle` as the wrapper for `identity`, returning any handle it
    /// replaces.
    pub fn insert(&mut self, identity: IdentityKey, wrapper: WrapperId, handle: W) -> Option<W> {
        self.entries
            .insert(identity, CacheEntry { wrapper, handle })
            .map(|previous| previous.handle)
    }

    /// Drop the entry for `identity` if it still belongs to `wrapper`.
    ///
    /// A newer wrapper may have replaced a collected one under the same
    /// identity before the old wrapper's finalizer ran; that entry is kept.
    pub fn remove_if(&mut self, identity: &IdentityKey, wrapper: WrapperId) -> Option<W> {
        match self.entries.get(identity) {
            Some(entry) if entry.wrapper == wrapper => {
                self.entries.remove(identity).map(|entry| entry.handle)
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) -> Vec<W> {
        self.entries.drain().map(|(_, entry)| entry.handle).collect()
    }
}

impl<W> Default for ObjectCache<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Script object → host container, for one conversion.
///
/// Objects are bucketed by their identity hash; a hash collision is resolved
/// by the caller's equality test.
pub struct ConversionLookup<K> {
    buckets: HashMap<i32, Vec<(K, HostValue)>>,
    produced: usize,
}

impl<K> ConversionLookup<K> {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            produced: 0,
        }
    }

    /// The host value produced for the object `same` recognizes.
    pub fn get(&self, hash: i32, mut same: impl FnMut(&K) -> bool) -> Option<&HostValue> {
        self.buckets
            .get(&hash)?
            .iter()
            .find(|(key, _)| same(key))
            .map(|(_, value)| value)
    }

    /// Record the host value produced for `key`. The conversion holds one
    /// reference on every recorded container until it finishes.
    pub fn insert(&mut self, hash: i32, key: K, value: HostValue) {
        self.produced += 1;
        self.buckets.entry(hash).or_default().push((key, value));
    }

    /// Number of containers produced so far.
    pub fn len(&self) -> usize {
        self.produced
    }

    pub fn is_empty(&self) -> bool {
        self.produced == 0
    }

    /// Every container produced, in no particular order.
    pub fn into_values(self) -> impl Iterator<Item = HostValue> {
        self.buckets
            .into_values()
            .flat_map(|bucket| bucket.into_iter().map(|(_, value)| value))
    }
}

impl<K> Default for ConversionLookup<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::host_value::{DictId, ListId};

    fn wrapper(n: u64) -> WrapperId {
        WrapperId::from_serial(n)
    }

    #[test]
    fn test_cache_single_instance() {
        let mut cache: ObjectCache<&str> = ObjectCache::new();
        let key = IdentityKey::List(ListId::from_raw(7));

        assert!(cache.insert(key.clone(), wrapper(1), "first").is_none());
        assert_eq!(cache.get(&key), Some(&"first"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_if_respects_replacement() {
        let mut cache: ObjectCache<&str> = ObjectCache::new();
        let key = IdentityKey::Dict(DictId::from_raw(3));

        cache.insert(key.clone(), wrapper(1), "old");
        cache.insert(key.clone(), wrapper(2), "new");

        // The stale finalizer must not evict the newer wrapper.
        assert_eq!(cache.remove_if(&key, wrapper(1)), None);
        assert_eq!(cache.get(&key), Some(&"new"));
        assert_eq!(cache.remove_if(&key, wrapper(2)), Some("new"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_function_identity_by_name() {
        let mut cache: ObjectCache<u8> = ObjectCache::new();
        cache.insert(IdentityKey::Func("strlen".into()), wrapper(1), 1);
        assert_eq!(cache.get(&IdentityKey::Func("strlen".into())), Some(&1));
        assert_eq!(cache.get(&IdentityKey::Func("len".into())), None);
        assert_eq!(cache.clear(), vec![1]);
    }

    #[test]
    fn test_lookup_resolves_collisions() {
        let mut lookup: ConversionLookup<&str> = ConversionLookup::new();
        let a = HostValue::List(ListId::from_raw(1));
        let b = HostValue::Dict(DictId::from_raw(2));

        lookup.insert(42, "a", a.clone());
        lookup.insert(42, "b", b.clone());

        assert_eq!(lookup.get(42, |k| *k == "a"), Some(&a));
        assert_eq!(lookup.get(42, |k| *k == "b"), Some(&b));
        assert_eq!(lookup.get(42, |k| *k == "c"), None);
        assert_eq!(lookup.get(7, |_| true), None);
        assert_eq!(lookup.len(), 2);

        let mut values: Vec<_> = lookup.into_values().collect();
        values.sort_by_key(|v| format!("{:?}", v));
        assert_eq!(values, vec![b, a]);
    }
}
