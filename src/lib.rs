//! An embeddable Multicast DNS (mDNS, RFC 6762) participant engine.
//!
//! The engine is sans-I/O: it owns no socket and reads no clock or random
//! source on its own. A host drives it with three calls in a loop —
//! [`Engine::max_sleep_time`] to size the next socket wait, [`Engine::input`]
//! when a datagram arrives, and [`Engine::output`] repeatedly until it
//! returns `None` — and supplies the wall-clock/PRNG via the [`Clock`] and
//! [`Rng`] traits at construction time. Wire encoding and decoding are the
//! host's job too; see [`codec`] for the shapes exchanged at that boundary.

pub mod answer;
pub mod arena;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod error;
pub mod input;
pub mod name;
pub mod query;
pub mod record_store;
pub mod record_type;
pub mod scheduler;

#[cfg(test)]
mod tests;

use core::net::SocketAddr;
use core::time::Duration;

pub use answer::{Answer, Decoded, Srv};
pub use cache::{CacheHandle, CACHE_TTL_DIVISOR, CACHE_TTL_MARGIN_SECS};
pub use clock::{Clock, FakeClock, FakeRng, Rng};
pub use codec::{InboundMessage, OutboundMessage, Question, WireRecord};
pub use error::{ArenaKind, EngineError};
pub use query::{QueryHandle as QueryId, QueryOutcome};
pub use record_store::RecordHandle;
pub use record_type::RecordType;

use cache::Cache;
use query::QueryRegistry;
use record_store::RecordStore;
use scheduler::Scheduler;

/// UDP port mDNS operates on (RFC 6762 §3).
pub const MDNS_PORT: u16 = 5353;
/// The IPv4 mDNS multicast group.
pub const MDNS_MULTICAST_IPV4: core::net::Ipv4Addr = core::net::Ipv4Addr::new(224, 0, 0, 251);
/// The IPv6 mDNS multicast group.
pub const MDNS_MULTICAST_IPV6: &str = "ff02::fb";

const DEFAULT_CLASS: u16 = 1; // IN
const DEFAULT_FRAME_SIZE: usize = 1472; // typical Ethernet MTU minus IP/UDP headers
const DEFAULT_GC_INTERVAL_SECS: u64 = 180;
const DEFAULT_PROBE_INTERVAL_MS: u64 = 250;
const DEFAULT_PUBLISH_RETRY_SECS: u64 = 2;
const DEFAULT_SHARED_JITTER_MS: (u32, u32) = (20, 120);
const DEFAULT_QUERY_TRIES_LIMIT: u8 = 3;

/// Tunables for an [`Engine`], builder-styled: construct with
/// [`EngineOptions::new`] and chain `with_*` calls.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
  pub(crate) class: u16,
  pub(crate) frame_size: usize,
  pub(crate) gc_interval_secs: u64,
  pub(crate) probe_interval_ms: u64,
  pub(crate) publish_retry_secs: u64,
  pub(crate) shared_jitter_ms: (u32, u32),
  pub(crate) query_tries_limit: u8,
  pub(crate) cache_ttl_divisor: u32,
  pub(crate) cache_ttl_margin: u32,
  pub(crate) max_records: Option<usize>,
  pub(crate) max_cache_entries: Option<usize>,
  pub(crate) max_queries: Option<usize>,
}

impl EngineOptions {
  pub fn new(class: u16, frame_size: usize) -> Self {
    Self {
      class,
      frame_size,
      ..Self::default()
    }
  }

  pub fn with_class(mut self, class: u16) -> Self {
    self.class = class;
    self
  }

  pub fn with_frame_size(mut self, frame_size: usize) -> Self {
    self.frame_size = frame_size;
    self
  }

  pub fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
    self.gc_interval_secs = gc_interval.as_secs();
    self
  }

  pub fn with_probe_interval(mut self, probe_interval: Duration) -> Self {
    self.probe_interval_ms = probe_interval.as_millis() as u64;
    self
  }

  pub fn with_publish_retry_interval(mut self, interval: Duration) -> Self {
    self.publish_retry_secs = interval.as_secs();
    self
  }

  pub fn with_shared_jitter(mut self, low: Duration, high: Duration) -> Self {
    self.shared_jitter_ms = (low.as_millis() as u32, high.as_millis() as u32);
    self
  }

  pub fn with_query_tries_limit(mut self, limit: u8) -> Self {
    self.query_tries_limit = limit;
    self
  }

  pub fn with_cache_ttl(mut self, divisor: u32, margin: Duration) -> Self {
    self.cache_ttl_divisor = divisor;
    self.cache_ttl_margin = margin.as_secs() as u32;
    self
  }

  /// Caps the record store (§9b). `alloc_shared`/`alloc_unique` return
  /// `EngineError::Exhausted` once this many records are live. `None`
  /// (the default) leaves it unbounded.
  pub fn with_max_records(mut self, max: usize) -> Self {
    self.max_records = Some(max);
    self
  }

  /// Caps the cache (§9b). New entries are silently dropped past this
  /// limit instead — cache insertion happens on the `input()` hot path,
  /// which never surfaces an error. `None` (the default) leaves it
  /// unbounded.
  pub fn with_max_cache_entries(mut self, max: usize) -> Self {
    self.max_cache_entries = Some(max);
    self
  }

  /// Caps the query registry (§9b). `query` returns `EngineError::Exhausted`
  /// once this many distinct queries are registered. `None` (the default)
  /// leaves it unbounded.
  pub fn with_max_queries(mut self, max: usize) -> Self {
    self.max_queries = Some(max);
    self
  }
}

impl Default for EngineOptions {
  fn default() -> Self {
    Self {
      class: DEFAULT_CLASS,
      frame_size: DEFAULT_FRAME_SIZE,
      gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
      probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
      publish_retry_secs: DEFAULT_PUBLISH_RETRY_SECS,
      shared_jitter_ms: DEFAULT_SHARED_JITTER_MS,
      query_tries_limit: DEFAULT_QUERY_TRIES_LIMIT,
      cache_ttl_divisor: CACHE_TTL_DIVISOR,
      cache_ttl_margin: CACHE_TTL_MARGIN_SECS,
      max_records: None,
      max_cache_entries: None,
      max_queries: None,
    }
  }
}

/// An mDNS participant: the four indices (§ record store, cache, query
/// registry) plus the send scheduler that ties them together.
pub struct Engine<C, R> {
  opts: EngineOptions,
  records: RecordStore,
  cache: Cache,
  queries: QueryRegistry,
  scheduler: Scheduler,
  clock: C,
  rng: R,
}

impl<C: Clock, R: Rng> Engine<C, R> {
  pub fn new(opts: EngineOptions, clock: C, rng: R) -> Self {
    let scheduler = Scheduler::new(&opts);
    Self {
      opts,
      records: RecordStore::new(),
      cache: Cache::new(),
      queries: QueryRegistry::new(),
      scheduler,
      clock,
      rng,
    }
  }

  /// Moves every published record to immediate goodbye (`ttl=0`, `a_now`);
  /// subsequent `output` calls announce departure. The engine keeps
  /// responding to queries and retrying queued sends until dropped.
  pub fn shutdown(&mut self) {
    self.scheduler.shutdown();
    let handles: Vec<RecordHandle> = self.records.iter().map(|(h, _)| h).collect();
    for h in handles {
      let is_probing = match self.records.get(h) {
        Some(rec) => rec.is_probing(),
        None => continue,
      };
      if is_probing {
        // A still-probing record can never reach the goodbye path: once
        // `shutting_down` is set, `Scheduler::build_output` returns before
        // probing ever runs again, so free it outright instead of stranding
        // it in the arena (mirrors `RecordStore::done`'s probing branch).
        #[cfg(feature = "tracing")]
        if let Some(rec) = self.records.get(h) {
          tracing::debug!(name = %rec.answer.name, "shutdown: discarding still-probing record");
        }
        self.scheduler.remove_from_probing(h);
        self.records.remove_raw(h);
        continue;
      }
      if let Some(rec) = self.records.get_mut(h) {
        rec.answer.ttl = 0;
      }
      self.scheduler.push_now(&mut self.records, h);
    }
  }

  /// Re-arms every shared record for immediate re-announcement and drops
  /// every cache entry (§9d) — for when the host suspects the network
  /// changed (e.g. a link flap) and wants to rebuild state from scratch.
  pub fn flush(&mut self) {
    self.cache.clear();
    let handles: Vec<RecordHandle> = self.records.iter().map(|(h, _)| h).collect();
    for h in handles {
      self.records.publish_record(&mut self.scheduler, &self.clock, h);
    }
  }

  pub fn input(&mut self, msg: &InboundMessage, src: SocketAddr) {
    input::process(&mut self.records, &mut self.cache, &mut self.queries, &mut self.scheduler, &self.clock, &mut self.rng, &self.opts, msg, src);
  }

  pub fn output(&mut self) -> Option<(OutboundMessage, SocketAddr)> {
    self.scheduler.build_output(&mut self.records, &mut self.cache, &mut self.queries, &self.clock, MDNS_PORT)
  }

  pub fn max_sleep_time(&self) -> Duration {
    self.scheduler.max_sleep_time(&self.queries, &self.clock)
  }

  /// Registers a query, attaching it to every currently matching cache
  /// entry and priming its retry schedule (§4.4 `Query` + `QueryReset`).
  pub fn query(&mut self, name: impl Into<smol_str::SmolStr>, rtype: RecordType, cb: impl FnMut(&Answer) -> QueryOutcome + 'static) -> Result<QueryId, EngineError> {
    let name = name.into();
    let id = self.queries.register(self.opts.max_queries, name.clone(), rtype, cb)?;
    let ttls = self.cache.matching_ttls(&name, rtype);
    self.queries.reset(id, ttls, self.clock.now_secs() as u64);

    let mut cursor = self.cache.list(&name, rtype, None);
    while let Some(ch) = cursor {
      self.cache.set_query(ch, Some(id));
      cursor = self.cache.list(&name, rtype, Some(ch));
    }
    Ok(id)
  }

  pub fn unquery(&mut self, id: QueryId) {
    self.queries.unregister(id);
  }

  pub fn list_cached_answers(&self, name: &str, rtype: RecordType, last: Option<CacheHandle>) -> Option<(CacheHandle, &Answer)> {
    let h = self.cache.list(name, rtype, last)?;
    self.cache.get(h).map(|e| (h, &e.answer))
  }

  pub fn alloc_shared(&mut self, name: impl Into<smol_str::SmolStr>, rtype: RecordType, ttl: u32) -> Result<RecordHandle, EngineError> {
    self.records.alloc_shared(self.opts.max_records, name, rtype, ttl)
  }

  pub fn alloc_unique(&mut self, name: impl Into<smol_str::SmolStr>, rtype: RecordType, ttl: u32, conflict: impl FnMut(&Answer) + 'static) -> Result<RecordHandle, EngineError> {
    let h = self.records.alloc_unique(self.opts.max_records, name, rtype, ttl, conflict)?;
    self.scheduler.add_probing(h, &self.clock);
    Ok(h)
  }

  pub fn done(&mut self, h: RecordHandle) {
    self.records.done(&mut self.scheduler, h);
  }

  pub fn set_raw(&mut self, h: RecordHandle, rdata: Vec<u8>) {
    self.records.set_raw(&mut self.scheduler, &self.clock, h, rdata);
  }

  pub fn set_host(&mut self, h: RecordHandle, target: impl Into<smol_str::SmolStr>) {
    self.records.set_host(&mut self.scheduler, &self.clock, h, target);
  }

  pub fn set_ip(&mut self, h: RecordHandle, ip: core::net::Ipv4Addr) {
    self.records.set_ip(&mut self.scheduler, &self.clock, h, ip);
  }

  pub fn set_srv(&mut self, h: RecordHandle, priority: u16, weight: u16, port: u16, target: impl Into<smol_str::SmolStr>) {
    self.records.set_srv(&mut self.scheduler, &self.clock, h, priority, weight, port, target);
  }
}
