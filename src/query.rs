//! The query registry (spec §4.4): outstanding lookups, their retry
//! schedule, and the cache entries they're attached to.

use smol_str::SmolStr;

use crate::answer::Answer;
use crate::arena::{Buckets, SPRIME};
use crate::error::{ArenaKind, EngineError};
use crate::name::elf_hash_fold;
use crate::record_type::RecordType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub(crate) usize);

/// What a query callback wants after being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
  /// Keep the query registered.
  Continue,
  /// Unregister the query (the reference source's callback-returns-`-1`
  /// convention).
  Done,
}

pub(crate) type QueryCallback = Box<dyn FnMut(&Answer) -> QueryOutcome>;

pub struct QueryState {
  pub name: SmolStr,
  pub rtype: RecordType,
  pub(crate) name_hash: u32,
  pub tries: u8,
  /// Absolute seconds at which this query is next due for a retry/refresh.
  pub nexttry: u64,
  /// A query that has been answered and is only waiting on future cache
  /// changes is still "live" but doesn't count toward `checkqlist`.
  pub dormant: bool,
  cb: QueryCallback,
}

pub struct QueryRegistry {
  table: Buckets<QueryState>,
}

impl QueryRegistry {
  pub fn new() -> Self {
    Self {
      table: Buckets::new(SPRIME),
    }
  }

  pub fn get(&self, h: QueryHandle) -> Option<&QueryState> {
    self.table.get(h.0)
  }

  pub fn get_mut(&mut self, h: QueryHandle) -> Option<&mut QueryState> {
    self.table.get_mut(h.0)
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  /// Finds an existing query matching `name`/`rtype`, case-insensitively.
  pub fn find(&self, name: &str, rtype: RecordType) -> Option<QueryHandle> {
    let hash = elf_hash_fold(name.as_bytes());
    self
      .table
      .lookup(hash, None, |q| q.rtype.matches(rtype) && q.name.eq_ignore_ascii_case(name))
      .map(QueryHandle)
  }

  /// `Query(name, type, cb)` (§4.4): registers a new query, or overwrites
  /// the callback on an existing match. `max` is `EngineOptions::max_queries`;
  /// exceeding it surfaces `EngineError::Exhausted` (§9b). The caller is
  /// responsible for calling `QueryReset` afterward to prime `nexttry`
  /// against the cache.
  pub fn register(&mut self, max: Option<usize>, name: impl Into<SmolStr>, rtype: RecordType, cb: impl FnMut(&Answer) -> QueryOutcome + 'static) -> Result<QueryHandle, EngineError> {
    let name = name.into();
    crate::name::validate(&name)?;
    if let Some(existing) = self.find(&name, rtype) {
      if let Some(q) = self.table.get_mut(existing.0) {
        q.cb = Box::new(cb);
      }
      return Ok(existing);
    }
    if let Some(cap) = max {
      if self.table.len() >= cap {
        #[cfg(feature = "tracing")]
        tracing::warn!(cap, "query registry arena exhausted");
        return Err(EngineError::Exhausted { kind: ArenaKind::Queries });
      }
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(name = %name, rtype = %rtype, "query registered");
    let hash = elf_hash_fold(name.as_bytes());
    let state = QueryState {
      name,
      rtype,
      name_hash: hash,
      tries: 0,
      nexttry: 0,
      dormant: false,
      cb: Box::new(cb),
    };
    Ok(QueryHandle(self.table.insert(hash, state)))
  }

  /// `unquery` / `Query(..., cb=null)` (§4.4): unregisters a query.
  pub fn unregister(&mut self, h: QueryHandle) {
    if let Some(hash) = self.table.get(h.0).map(|q| q.name_hash) {
      self.table.remove(hash, h.0);
    }
  }

  /// `QueryReset(q)` (§4.4): recomputes `nexttry` as the earliest
  /// near-expiry among `matching_ttls` (each an absolute cache-entry
  /// expiry), firing 7 seconds ahead of it.
  pub fn reset(&mut self, h: QueryHandle, matching_ttls: impl IntoIterator<Item = u64>, now: u64) {
    let Some(q) = self.table.get_mut(h.0) else { return };
    q.tries = 0;
    q.nexttry = matching_ttls.into_iter().map(|ttl| ttl.saturating_sub(7)).min().unwrap_or(now);
  }

  /// `QueryAnswer(c)` (§4.4): delivers `answer` to the query's callback.
  /// Returns `true` if the query should be unregistered by the caller
  /// (callback returned `Done`).
  pub fn answer(&mut self, h: QueryHandle, answer: &Answer) -> bool {
    let Some(q) = self.table.get_mut(h.0) else { return false };
    matches!((q.cb)(answer), QueryOutcome::Done)
  }

  /// `min(query.nexttry)` over all non-dormant queries, or `None` if there
  /// are none — the global `checkqlist` deadline (§4.1).
  pub fn checkqlist(&self) -> Option<u64> {
    self.table.iter().filter(|(_, q)| !q.dormant).map(|(_, q)| q.nexttry).min()
  }

  /// Every query whose `nexttry` is due, for the retry pass (§4.5 step 9).
  pub fn due(&self, now: u64) -> Vec<QueryHandle> {
    self
      .table
      .iter()
      .filter(|(_, q)| !q.dormant && q.nexttry <= now)
      .map(|(k, _)| QueryHandle(k))
      .collect()
  }
}

impl Default for QueryRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record_type::RecordType;
  use std::cell::RefCell;
  use std::rc::Rc;

  #[test]
  fn register_then_find_is_case_insensitive() {
    let mut reg = QueryRegistry::new();
    let h = reg.register(None, "Host.Local", RecordType::A, |_| QueryOutcome::Continue).unwrap();
    assert_eq!(reg.find("host.LOCAL", RecordType::A), Some(h));
  }

  #[test]
  fn answer_done_signals_unregister() {
    let mut reg = QueryRegistry::new();
    let seen = Rc::new(RefCell::new(0));
    let seen2 = seen.clone();
    let h = reg
      .register(None, "host.local", RecordType::A, move |_| {
        *seen2.borrow_mut() += 1;
        QueryOutcome::Done
      })
      .unwrap();
    let a = Answer::new("host.local", RecordType::A, 120, Vec::new());
    assert!(reg.answer(h, &a));
    assert_eq!(*seen.borrow(), 1);
  }

  #[test]
  fn reset_picks_earliest_minus_seven() {
    let mut reg = QueryRegistry::new();
    let h = reg.register(None, "host.local", RecordType::A, |_| QueryOutcome::Continue).unwrap();
    reg.reset(h, [100u64, 50, 200], 10);
    assert_eq!(reg.get(h).unwrap().nexttry, 43);
  }

  #[test]
  fn checkqlist_ignores_dormant() {
    let mut reg = QueryRegistry::new();
    let h = reg.register(None, "a.local", RecordType::A, |_| QueryOutcome::Continue).unwrap();
    reg.reset(h, [50u64], 0);
    reg.get_mut(h).unwrap().dormant = true;
    assert_eq!(reg.checkqlist(), None);
  }
}
