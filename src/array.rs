//! A copy-on-write immutable array of region references, the first of the
//! two "typical consumers" that exercise ARCP's ownership model end to end.
//!
//! Every operation comes in a "mutate-or-reallocate" flavor (returns the
//! same array, possibly moved) and a "dup_" flavor (always allocates a
//! fresh body, leaving the input untouched). A `Vec<Option<Region<T>>>`
//! already grows/shrinks in place when it can and reallocates when it
//! can't, so that distinction is expressed here as `&mut self` in-place
//! mutators versus `&self` "dup_"-prefixed methods that clone into a fresh
//! `Vec`, rather than by hand-splicing `crate::alloc`'s raw allocator (see
//! DESIGN.md).

use std::cmp::Ordering;

use crate::region::Region;

/// An immutable-body, copy-on-write array of optional region references.
/// A `None` slot is a legal, distinct-from-absent element.
pub struct Array<T> {
    items: Vec<Option<Region<T>>>,
}

impl<T> Array<T> {
    /// Creates an array of `len` null slots.
    pub fn create(len: usize) -> Self {
        let mut items = Vec::with_capacity(len);
        items.resize_with(len, || None);
        Self { items }
    }

    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A fresh clone of the whole array, acquiring every slot.
    pub fn dup(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }

    /// Returns a strong handle to the element at `i`, or `None` if the slot
    /// is empty.
    pub fn load(&self, i: usize) -> Option<Region<T>> {
        self.items[i].clone()
    }

    /// Borrows the element at `i` without acquiring a new handle
    /// (`load_phantom`): safe here because COW arrays are single-owner at
    /// mutation time, unlike ARCP's `load_phantom` which must tolerate a
    /// concurrent store.
    pub fn load_phantom(&self, i: usize) -> Option<&Region<T>> {
        self.items[i].as_ref()
    }

    pub fn first(&self) -> Option<Region<T>> {
        self.items.first().and_then(|s| s.clone())
    }

    pub fn last(&self) -> Option<Region<T>> {
        self.items.last().and_then(|s| s.clone())
    }

    /// Replaces the slot at `i`, releasing whatever was there and
    /// returning it.
    pub fn store(&mut self, i: usize, value: Option<Region<T>>) -> Option<Region<T>> {
        std::mem::replace(&mut self.items[i], value)
    }

    pub fn store_first(&mut self, value: Option<Region<T>>) -> Option<Region<T>> {
        self.store(0, value)
    }

    pub fn store_last(&mut self, value: Option<Region<T>>) -> Option<Region<T>> {
        let last = self.items.len() - 1;
        self.store(last, value)
    }

    /// Inserts `region` at index `i`, shifting everything from `i` on up.
    pub fn insert(&mut self, i: usize, region: Region<T>) {
        self.items.insert(i, Some(region));
    }

    pub fn dup_insert(&self, i: usize, region: Region<T>) -> Self {
        let mut out = self.dup_vec();
        out.insert(i, Some(region));
        Self { items: out }
    }

    pub fn append(&mut self, region: Region<T>) {
        self.items.push(Some(region));
    }

    pub fn dup_append(&self, region: Region<T>) -> Self {
        let mut out = self.dup_vec();
        out.push(Some(region));
        Self { items: out }
    }

    pub fn prepend(&mut self, region: Region<T>) {
        self.items.insert(0, Some(region));
    }

    pub fn dup_prepend(&self, region: Region<T>) -> Self {
        let mut out = self.dup_vec();
        out.insert(0, Some(region));
        Self { items: out }
    }

    /// Removes and releases the element at `i`.
    pub fn remove(&mut self, i: usize) -> Option<Region<T>> {
        self.items.remove(i)
    }

    pub fn dup_remove(&self, i: usize) -> Self {
        let mut out = self.dup_vec();
        out.remove(i);
        Self { items: out }
    }

    pub fn pop(&mut self) -> Option<Region<T>> {
        self.items.pop().flatten()
    }

    pub fn dup_pop(&self) -> Self {
        let mut out = self.dup_vec();
        out.pop();
        Self { items: out }
    }

    pub fn shift(&mut self) -> Option<Region<T>> {
        if self.items.is_empty() {
            return None;
        }
        self.items.remove(0)
    }

    pub fn dup_shift(&self) -> Self {
        let mut out = self.dup_vec();
        if !out.is_empty() {
            out.remove(0);
        }
        Self { items: out }
    }

    fn dup_vec(&self) -> Vec<Option<Region<T>>> {
        self.items.clone()
    }

    /// Pointer-wise equality of every slot.
    pub fn equal(&self, other: &Self) -> bool {
        if self.items.len() != other.items.len() {
            return false;
        }
        self.items
            .iter()
            .zip(other.items.iter())
            .all(|(a, b)| region_identity(a.as_ref()) == region_identity(b.as_ref()))
    }

    /// Sorts in place by raw region pointer value.
    pub fn sortx(&mut self) {
        self.items.sort_by_key(|slot| region_identity(slot.as_ref()));
    }

    /// Sorts in place with a caller-supplied comparator. A closure already
    /// captures whatever context it needs, so one generic method covers
    /// both a stateless and a context-carrying comparator (see DESIGN.md).
    pub fn sort<F>(&mut self, mut compare: F)
    where
        F: FnMut(&Region<T>, &Region<T>) -> Ordering,
    {
        self.items.sort_by(|a, b| match (a, b) {
            (Some(a), Some(b)) => compare(a, b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }

    pub fn reverse(&mut self) {
        self.items.reverse();
    }

    fn bsearch_identity(&self, region: &Region<T>) -> Result<usize, usize> {
        let key = region_identity(Some(region));
        self.items.binary_search_by_key(&key, |slot| region_identity(slot.as_ref()))
    }

    /// Inserts `region` in pointer order if not already present.
    /// The array must already be `sortx`-sorted.
    pub fn set_add(&mut self, region: Region<T>) {
        if let Err(i) = self.bsearch_identity(&region) {
            self.insert(i, region);
        }
    }

    pub fn dup_set_add(&self, region: Region<T>) -> Self {
        match self.bsearch_identity(&region) {
            Ok(_) => self.dup(),
            Err(i) => self.dup_insert(i, region),
        }
    }

    /// Removes `region` by pointer identity if present.
    pub fn set_remove(&mut self, region: &Region<T>) {
        if let Ok(i) = self.bsearch_identity(region) {
            self.remove(i);
        }
    }

    pub fn dup_set_remove(&self, region: &Region<T>) -> Self {
        match self.bsearch_identity(region) {
            Ok(i) => self.dup_remove(i),
            Err(_) => self.dup(),
        }
    }

    pub fn set_contains(&self, region: &Region<T>) -> bool {
        self.bsearch_identity(region).is_ok()
    }
}

impl<T> Default for Array<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw pointer identity of a (possibly absent) region, used by `sortx` and
/// the set operations. `None` sorts before every present region, treating
/// a null slot as the lowest possible pointer value.
fn region_identity<T>(region: Option<&Region<T>>) -> usize {
    region.map(Region::identity).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_replaces_and_returns_old() {
        let mut a: Array<u32> = Array::create(1);
        let old = a.store(0, Some(Region::new(7)));
        assert!(old.is_none());
        let old = a.store(0, Some(Region::new(8)));
        assert_eq!(*old.unwrap(), 7);
        assert_eq!(*a.load(0).unwrap(), 8);
    }

    #[test]
    fn insert_append_prepend_shift_order() {
        let mut a: Array<u32> = Array::new();
        a.append(Region::new(2));
        a.prepend(Region::new(1));
        a.insert(2, Region::new(3));
        assert_eq!(a.len(), 3);
        assert_eq!(*a.shift().unwrap(), 1);
        assert_eq!(*a.pop().unwrap(), 3);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn dup_variants_never_touch_the_input() {
        let mut a: Array<u32> = Array::new();
        a.append(Region::new(10));
        let b = a.dup_append(Region::new(20));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn sortx_then_set_add_remove_by_identity() {
        let r1 = Region::new("alpha");
        let r2 = Region::new("beta");
        let r3 = Region::new("gamma");
        let rx = Region::new("delta");

        let mut a: Array<&str> = Array::new();
        a.append(r1.clone());
        a.append(r3.clone());
        a.append(r2.clone());

        a.sortx();
        let ids: Vec<usize> = (0..a.len()).map(|i| a.load(i).unwrap().identity()).collect();
        assert!(ids.windows(2).all(|w| w[0] <= w[1]));

        assert!(a.set_contains(&r2));
        assert!(!a.set_contains(&rx));

        a.set_add(r2.clone());
        assert_eq!(a.len(), 3, "adding an already-present element is a no-op");

        a.set_remove(&r2);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn equal_is_pointer_wise() {
        let r1 = Region::new(1u32);
        let r2 = Region::new(2u32);
        let mut a: Array<u32> = Array::new();
        a.append(r1.clone());
        a.append(r2.clone());
        let b = a.dup();
        assert!(a.equal(&b));
        let mut c: Array<u32> = Array::new();
        c.append(Region::new(1u32));
        c.append(Region::new(2u32));
        assert!(!a.equal(&c), "distinct regions with equal payloads are not pointer-equal");
    }
}
