//! A copy-on-write immutable sorted dictionary keyed by byte strings, the
//! second "typical consumer" exercising ARCP's ownership model.
//!
//! Keys are `Region<Vec<u8>>`s ordered lexicographically over their raw
//! bytes (a shorter prefix sorts first) — exactly `[u8]`'s own `Ord` impl,
//! so no custom comparator is needed. As with [`crate::array`], the
//! "mutate-or-reallocate" vs "always-dup" split is expressed as `&mut self`
//! vs `&self` methods rather than hand-rolled realloc calls (see
//! DESIGN.md).

use crate::region::Region;

/// A dictionary key: an immutable byte string held in its own region so it
/// can be shared (acquired) across entries and duplicated dictionaries
/// without copying its bytes.
pub type Key = Region<Vec<u8>>;

/// Out-of-band lookup result: a missing key is
/// reported distinctly from a stored value that happens to be `None`-like,
/// so a dictionary of `Option<V>` values is never ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::NotFound => None,
        }
    }
}

struct Entry<V> {
    key: Key,
    value: Region<V>,
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }
}

/// An immutable-body, copy-on-write dictionary: entries sorted ascending
/// by key under `[u8]`'s byte order, keys unique.
pub struct Dict<V> {
    entries: Vec<Entry<V>>,
}

impl<V> Dict<V> {
    pub fn create() -> Self {
        Self { entries: Vec::new() }
    }

    /// Single-entry constructor.
    pub fn create_put(key: Key, value: Region<V>) -> Self {
        Self {
            entries: vec![Entry { key, value }],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bsearch(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|entry| entry.key.as_slice().cmp(key))
    }

    /// A fresh clone of the whole dictionary, acquiring every key and
    /// value.
    pub fn dup(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }

    /// Looks up `key`, returning a strong handle to its value.
    pub fn get(&self, key: &[u8]) -> Lookup<Region<V>> {
        match self.bsearch(key) {
            Ok(i) => Lookup::Found(self.entries[i].value.clone()),
            Err(_) => Lookup::NotFound,
        }
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.bsearch(key).is_ok()
    }

    /// Inserts or replaces `key`'s value in place. Returns
    /// the value that was displaced, if any.
    pub fn put(&mut self, key: Key, value: Region<V>) -> Option<Region<V>> {
        match self.bsearch(key.as_slice()) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].value, value)),
            Err(i) => {
                self.entries.insert(i, Entry { key, value });
                None
            }
        }
    }

    /// Like [`Dict::put`], but never mutates `self` — always returns a
    /// fresh dictionary.
    pub fn dup_put(&self, key: Key, value: Region<V>) -> Self {
        match self.bsearch(key.as_slice()) {
            Ok(i) => {
                let mut entries = self.entries.clone();
                entries[i] = Entry { key, value };
                Self { entries }
            }
            Err(i) => {
                let mut entries = self.entries.clone();
                entries.insert(i, Entry { key, value });
                Self { entries }
            }
        }
    }

    /// Removes `key` in place, returning its value, or
    /// [`Lookup::NotFound`] if the key was never present.
    pub fn del(&mut self, key: &[u8]) -> Lookup<Region<V>> {
        match self.bsearch(key) {
            Ok(i) => Lookup::Found(self.entries.remove(i).value),
            Err(_) => Lookup::NotFound,
        }
    }

    /// Like [`Dict::del`], but always returns a fresh dictionary;
    /// [`Lookup::NotFound`] if the key was never present, leaving no
    /// dictionary to return.
    pub fn dup_del(&self, key: &[u8]) -> Lookup<Self> {
        match self.bsearch(key) {
            Ok(i) => {
                let mut entries = self.entries.clone();
                entries.remove(i);
                Lookup::Found(Self { entries })
            }
            Err(_) => Lookup::NotFound,
        }
    }
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::create()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Region::new(s.as_bytes().to_vec())
    }

    #[test]
    fn entries_stay_sorted_by_raw_key_bytes() {
        let mut d: Dict<u32> = Dict::create();
        d.put(key("b"), Region::new(2));
        d.put(key("a"), Region::new(1));
        d.put(key("c"), Region::new(3));
        let keys: Vec<u8> = (0..d.len())
            .map(|i| d.entries[i].key.as_slice()[0])
            .collect();
        assert_eq!(keys, vec![b'a', b'b', b'c']);
    }

    #[test]
    fn shorter_prefix_sorts_first() {
        let mut d: Dict<u32> = Dict::create();
        d.put(key("ab"), Region::new(2));
        d.put(key("a"), Region::new(1));
        assert_eq!(d.entries[0].key.as_slice(), b"a");
        assert_eq!(d.entries[1].key.as_slice(), b"ab");
    }

    #[test]
    fn get_missing_key_is_not_found_distinct_from_null() {
        let d: Dict<Option<u32>> = Dict::create_put(key("k"), Region::new(None));
        assert_eq!(d.get(b"k").ok().map(|v| *v), Some(None));
        assert!(matches!(d.get(b"missing"), Lookup::NotFound));
    }

    #[test]
    fn put_replaces_value_and_drops_old_in_place_only() {
        use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct V(u32);
        impl Drop for V {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Relaxed);
            }
        }

        let mut d: Dict<V> = Dict::create();
        d.put(key("k"), Region::new(V(1)));
        let old = d.put(key("k"), Region::new(V(2)));
        drop(old);
        assert_eq!(DROPS.load(Relaxed), 1, "V1's destructor fires when put replaces it");

        assert_eq!(d.get(b"k").ok().map(|v| v.0), Some(2));

        let d2 = d.dup_put(key("k"), Region::new(V(3)));
        assert_eq!(
            DROPS.load(Relaxed),
            1,
            "dup_put must not drop the replaced value until the original dict is dropped"
        );
        drop(d);
        assert_eq!(DROPS.load(Relaxed), 2);
        drop(d2);
        assert_eq!(DROPS.load(Relaxed), 3);
    }

    #[test]
    fn del_missing_key_reports_not_found() {
        let mut d: Dict<u32> = Dict::create();
        d.put(key("k"), Region::new(1));
        assert!(matches!(d.del(b"missing"), Lookup::NotFound));
        assert!(matches!(d.del(b"k"), Lookup::Found(_)));
        assert!(d.is_empty());
    }
}
