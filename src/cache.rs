//! The cache (spec §4.3): records learned from peers, indexed by name and
//! type, with half-TTL refresh scheduling and goodbye (TTL=0) deletion.

use smol_str::SmolStr;

use crate::answer::Answer;
use crate::arena::{Buckets, LPRIME};
use crate::codec::WireRecord;
use crate::name::elf_hash_fold;
use crate::query::QueryHandle;
use crate::record_type::RecordType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheHandle(pub(crate) usize);

/// Divides a record's wire TTL to derive its absolute-expiry deliberate
/// early-refresh point (§9: `now + ttl/cache_ttl_divisor + cache_ttl_margin`).
pub const CACHE_TTL_DIVISOR: u32 = 2;
pub const CACHE_TTL_MARGIN_SECS: u32 = 8;

pub struct CacheEntry {
  /// `answer.ttl` holds the *absolute* expiry (wall-clock seconds), not a
  /// duration, once the entry is linked into the cache.
  pub answer: Answer,
  pub(crate) name_hash: u32,
  pub query: Option<QueryHandle>,
}

impl CacheEntry {
  #[inline]
  pub fn remaining(&self, now: u64) -> u64 {
    (self.answer.ttl as u64).saturating_sub(now)
  }
}

pub struct Cache {
  table: Buckets<CacheEntry>,
}

impl Cache {
  pub fn new() -> Self {
    Self {
      table: Buckets::new(LPRIME),
    }
  }

  pub fn get(&self, h: CacheHandle) -> Option<&CacheEntry> {
    self.table.get(h.0)
  }

  pub fn get_mut(&mut self, h: CacheHandle) -> Option<&mut CacheEntry> {
    self.table.get_mut(h.0)
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  /// `ListCachedAnswers` (§7): resumable lookup, `ANY` in `rtype` matching
  /// any stored type.
  pub fn list(&self, name: &str, rtype: RecordType, after: Option<CacheHandle>) -> Option<CacheHandle> {
    let hash = elf_hash_fold(name.as_bytes());
    self
      .table
      .lookup(hash, after.map(|h| h.0), |e| rtype.matches(e.answer.rtype) && e.answer.name.eq_ignore_ascii_case(name))
      .map(CacheHandle)
  }

  /// The bucket index a given name hashes to, so callers can expire a
  /// whole bucket (§4.5 step 9, giving up on an exhausted query).
  pub fn bucket_index_for(&self, name: &str) -> usize {
    self.table.bucket_index(elf_hash_fold(name.as_bytes()))
  }

  /// Every absolute expiry for entries matching `name`/`rtype`, used by
  /// `QueryReset` to prime a query's `nexttry`.
  pub fn matching_ttls(&self, name: &str, rtype: RecordType) -> Vec<u64> {
    let mut out = Vec::new();
    let mut cursor = self.list(name, rtype, None);
    while let Some(h) = cursor {
      if let Some(e) = self.get(h) {
        out.push(e.answer.ttl as u64);
      }
      cursor = self.list(name, rtype, Some(h));
    }
    out
  }

  fn set_absolute_ttl(ttl: u32, now: u64, divisor: u32, margin: u32) -> u32 {
    (now + (ttl / divisor.max(1)) as u64 + margin as u64) as u32
  }

  /// `AddResource` steps 1-3 (§4.3). Cache-flush and goodbye handling mutate
  /// or remove entries directly; a genuinely new/refreshed entry is
  /// inserted and its handle returned so the caller (the input processor)
  /// can look up a matching query and deliver `QueryAnswer` — cache and
  /// query registry stay separately owned, linked only by handle (§9).
  /// Any entry removed outright by a cache-flush or a `ttl=0` goodbye may
  /// back-reference a query; those are returned alongside as `ttl=0`
  /// answers so the caller can fire and unregister them (§4.3 `Expire`).
  ///
  /// `max` is `EngineOptions::max_cache_entries`. Cache insertion happens on
  /// the `input()` hot path, which never returns an error (§9b); a brand
  /// new entry that would exceed `max` is silently dropped instead.
  pub fn add_resource(&mut self, rec: &WireRecord, now: u64, ttl_divisor: u32, ttl_margin: u32, max: Option<usize>) -> (Option<CacheHandle>, Vec<(QueryHandle, Answer)>) {
    let hash = elf_hash_fold(rec.name.as_bytes());
    let mut fired = Vec::new();

    if rec.cache_flush() {
      fired.extend(self.expire_matching(hash, &rec.name, rec.rtype, true));
    }

    if rec.ttl == 0 {
      fired.extend(self.expire_matching(hash, &rec.name, rec.rtype, true));
      return (None, fired);
    }

    // Refresh in place if an identical entry already exists (spec §8:
    // "two successive identical AddResource calls leave exactly one entry").
    if let Some(existing) = self.list(&rec.name, rec.rtype, None) {
      if let Some(e) = self.table.get_mut(existing.0) {
        e.answer.ttl = Self::set_absolute_ttl(rec.ttl, now, ttl_divisor, ttl_margin);
        e.answer.rdata = rec.rdata.clone();
        e.answer.decoded = rec.decoded.clone();
        return (Some(existing), fired);
      }
    }

    if let Some(cap) = max {
      if self.table.len() >= cap {
        #[cfg(feature = "tracing")]
        tracing::warn!(name = %rec.name, "cache arena exhausted, dropping new entry");
        return (None, fired);
      }
    }

    let absolute = Self::set_absolute_ttl(rec.ttl, now, ttl_divisor, ttl_margin);
    let answer = Answer {
      name: rec.name.clone(),
      rtype: rec.rtype,
      ttl: absolute,
      rdata: rec.rdata.clone(),
      decoded: rec.decoded.clone(),
    };
    let entry = CacheEntry {
      answer,
      name_hash: hash,
      query: None,
    };
    (Some(CacheHandle(self.table.insert(hash, entry))), fired)
  }

  pub fn set_query(&mut self, h: CacheHandle, q: Option<QueryHandle>) {
    if let Some(e) = self.table.get_mut(h.0) {
      e.query = q;
    }
  }

  /// Expires every entry in `name`/`rtype`'s bucket matching the name,
  /// returning the back-referenced queries as `ttl=0` goodbye answers
  /// (mirroring [`Self::expire_bucket`]'s shape) so the caller can deliver
  /// them and unregister the query.
  fn expire_matching(&mut self, hash: u32, name: &SmolStr, rtype: RecordType, force: bool) -> Vec<(QueryHandle, Answer)> {
    let mut fired = Vec::new();
    let keys: Vec<usize> = self.table.bucket_keys(hash).to_vec();
    for key in keys {
      let Some(e) = self.table.get(key) else { continue };
      if !(force && e.answer.name.eq_ignore_ascii_case(name) && rtype.matches(e.answer.rtype)) {
        continue;
      }
      if let Some(q) = e.query {
        let mut goodbye = e.answer.clone();
        goodbye.ttl = 0;
        fired.push((q, goodbye));
      }
      self.table.remove(hash, key);
    }
    fired
  }

  /// `Expire(bucket)` (§4.3): walk one bucket, evicting everything whose
  /// absolute TTL has passed. Returns the back-referenced queries so the
  /// caller can deliver the `ttl=0` going-away signal.
  pub fn expire_bucket(&mut self, idx: usize, now: u64) -> Vec<(QueryHandle, Answer)> {
    let mut fired = Vec::new();
    let keys: Vec<usize> = self.table.bucket_keys_at(idx).to_vec();
    for key in keys {
      let Some(e) = self.table.get(key) else { continue };
      if (e.answer.ttl as u64) > now {
        continue;
      }
      let hash = e.name_hash;
      if let Some(q) = e.query {
        let mut goodbye = e.answer.clone();
        goodbye.ttl = 0;
        fired.push((q, goodbye));
      }
      self.table.remove(hash, key);
    }
    fired
  }

  /// `GC` (§4.3): expire every bucket. Returns the union of fired queries.
  pub fn gc(&mut self, now: u64) -> Vec<(QueryHandle, Answer)> {
    let mut fired = Vec::new();
    for idx in 0..self.table.modulus() {
      fired.extend(self.expire_bucket(idx, now));
    }
    fired
  }

  /// Drops every cached entry unconditionally — used by `flush()` (§9d).
  pub fn clear(&mut self) {
    for idx in 0..self.table.modulus() {
      let keys: Vec<usize> = self.table.bucket_keys_at(idx).to_vec();
      for key in keys {
        if let Some(e) = self.table.get(key) {
          let hash = e.name_hash;
          self.table.remove(hash, key);
        }
      }
    }
  }
}

impl Default for Cache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record_type::RecordType;

  fn rec(name: &str, ttl: u32, flush: bool) -> WireRecord {
    let class = if flush { 1 | 0x8000 } else { 1 };
    WireRecord::new(name, RecordType::A, class, ttl, Vec::new())
  }

  #[test]
  fn repeated_add_resource_leaves_one_entry() {
    let mut cache = Cache::new();
    cache.add_resource(&rec("host.local", 120, false), 0, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS, None);
    cache.add_resource(&rec("host.local", 60, false), 0, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS, None);
    let h = cache.list("host.local", RecordType::A, None).unwrap();
    assert!(cache.list("host.local", RecordType::A, Some(h)).is_none());
    assert_eq!(cache.get(h).unwrap().answer.ttl, 0 + 60 / 2 + 8);
  }

  #[test]
  fn zero_ttl_is_goodbye() {
    let mut cache = Cache::new();
    cache.add_resource(&rec("host.local", 120, false), 0, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS, None);
    let (handle, _) = cache.add_resource(&rec("host.local", 0, false), 0, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS, None);
    assert!(handle.is_none());
    assert!(cache.list("host.local", RecordType::A, None).is_none());
  }

  #[test]
  fn goodbye_fires_back_referenced_query() {
    let mut cache = Cache::new();
    let (h, _) = cache.add_resource(&rec("host.local", 120, false), 0, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS, None);
    let h = h.unwrap();
    let qh = QueryHandle(7);
    cache.set_query(h, Some(qh));
    let (handle, fired) = cache.add_resource(&rec("host.local", 0, false), 0, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS, None);
    assert!(handle.is_none());
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].0, qh);
    assert_eq!(fired[0].1.ttl, 0);
  }

  #[test]
  fn expire_bucket_evicts_past_deadline() {
    let mut cache = Cache::new();
    let (h, _) = cache.add_resource(&rec("host.local", 10, false), 0, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS, None);
    let h = h.unwrap();
    let idx = cache.table.bucket_index(cache.get(h).unwrap().name_hash);
    let fired = cache.expire_bucket(idx, 1000);
    assert!(fired.is_empty());
    assert!(cache.get(h).is_none());
  }
}
