//! The hash index (spec §4.1) and the "arena + indices" design note (§9f):
//! one `slab::Slab<T>` per entity kind plus a bucket-indexed `Vec<Vec<key>>`
//! chain table over it. Bucket chains, send queues, and the probing/qlist
//! lists all store `slab` keys rather than pointers, so there is nothing to
//! dangle and nothing for `Drop` to walk by hand.

use slab::Slab;

/// Published records and queries live in a smaller table; the cache, which
/// tends to hold far more entries, gets a larger one. Both are the classic
/// prime moduli from the long-lived `mdnsd.c` lineage this engine distills.
pub const SPRIME: usize = 109;
pub const LPRIME: usize = 1009;

/// A hash-bucketed arena: a `slab::Slab<T>` for storage plus a fixed number
/// of singly-chained buckets (modeled as `Vec<usize>` of slab keys) for
/// `O(bucket size)` lookup by name hash.
pub struct Buckets<T> {
  slab: Slab<T>,
  buckets: Vec<Vec<usize>>,
}

impl<T> Buckets<T> {
  pub fn new(modulus: usize) -> Self {
    Self {
      slab: Slab::new(),
      buckets: (0..modulus).map(|_| Vec::new()).collect(),
    }
  }

  #[inline]
  pub fn modulus(&self) -> usize {
    self.buckets.len()
  }

  #[inline]
  pub fn bucket_index(&self, hash: u32) -> usize {
    (hash as usize) % self.buckets.len()
  }

  /// Inserts `value`, placing it in the bucket for `hash`. Returns the slab
  /// key, which callers keep as the entity's stable identity.
  pub fn insert(&mut self, hash: u32, value: T) -> usize {
    let key = self.slab.insert(value);
    let idx = self.bucket_index(hash);
    self.buckets[idx].push(key);
    key
  }

  pub fn get(&self, key: usize) -> Option<&T> {
    self.slab.get(key)
  }

  pub fn get_mut(&mut self, key: usize) -> Option<&mut T> {
    self.slab.get_mut(key)
  }

  /// Removes and returns the entity at `key`, unlinking it from its bucket
  /// chain. `hash` must be the same hash the entity was inserted with.
  pub fn remove(&mut self, hash: u32, key: usize) -> Option<T> {
    let value = self.slab.try_remove(key)?;
    let idx = self.bucket_index(hash);
    if let Some(pos) = self.buckets[idx].iter().position(|&k| k == key) {
      self.buckets[idx].swap_remove(pos);
    }
    Some(value)
  }

  #[inline]
  pub fn bucket_keys(&self, hash: u32) -> &[usize] {
    &self.buckets[self.bucket_index(hash)]
  }

  /// Every key in bucket `idx`, for whole-bucket operations like cache
  /// expiry and flush that don't start from a name hash.
  #[inline]
  pub fn bucket_keys_at(&self, idx: usize) -> &[usize] {
    &self.buckets[idx]
  }

  /// Resumable bucket lookup (spec §4.1): scans the bucket for `hash`
  /// starting just after `after` (or from the start if `None`), returning
  /// the first key for which `pred` holds.
  pub fn lookup(&self, hash: u32, after: Option<usize>, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
    let keys = self.bucket_keys(hash);
    let start = match after {
      Some(prev) => keys.iter().position(|&k| k == prev).map(|i| i + 1).unwrap_or(0),
      None => 0,
    };
    keys[start..].iter().copied().find(|&k| self.slab.get(k).is_some_and(&mut pred))
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.slab.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.slab.is_empty()
  }

  pub fn iter(&self) -> slab::Iter<'_, T> {
    self.slab.iter()
  }

  pub fn iter_mut(&mut self) -> slab::IterMut<'_, T> {
    self.slab.iter_mut()
  }

  pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
    self.slab.iter().map(|(k, _)| k)
  }
}
