//! The record store (spec §4.2): locally published records, shared and
//! unique, their probe counters, and their send-queue membership.

use smol_str::SmolStr;

use crate::answer::Answer;
use crate::arena::{Buckets, SPRIME};
use crate::clock::{Clock, Rng};
use crate::error::{ArenaKind, EngineError};
use crate::name::elf_hash_fold;
use crate::record_type::RecordType;
use crate::scheduler::{Scheduler, SendQueue};

/// A stable handle to a published record, returned by `alloc_shared`/
/// `alloc_unique` and accepted by every mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle(pub(crate) usize);

/// `unique` states (spec §3/§4.7): `0` is shared, `1..=4` is an in-progress
/// probe step, `5` is probed-and-published.
pub const UNIQUE_SHARED: u8 = 0;
pub const UNIQUE_PROBE_MAX: u8 = 4;
pub const UNIQUE_PUBLISHED: u8 = 5;

pub(crate) type ConflictCallback = Box<dyn FnMut(&Answer)>;

pub struct PublishedRecord {
  pub answer: Answer,
  pub(crate) name_hash: u32,
  pub unique: u8,
  pub tries: u8,
  pub(crate) queue: Option<SendQueue>,
  conflict: Option<ConflictCallback>,
}

impl PublishedRecord {
  #[inline]
  pub fn is_probing(&self) -> bool {
    (1..UNIQUE_PUBLISHED).contains(&self.unique)
  }

  #[inline]
  pub fn is_unique(&self) -> bool {
    self.unique != UNIQUE_SHARED
  }
}

pub struct RecordStore {
  table: Buckets<PublishedRecord>,
}

impl RecordStore {
  pub fn new() -> Self {
    Self {
      table: Buckets::new(SPRIME),
    }
  }

  pub fn get(&self, h: RecordHandle) -> Option<&PublishedRecord> {
    self.table.get(h.0)
  }

  pub fn get_mut(&mut self, h: RecordHandle) -> Option<&mut PublishedRecord> {
    self.table.get_mut(h.0)
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (RecordHandle, &PublishedRecord)> {
    self.table.iter().map(|(k, v)| (RecordHandle(k), v))
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = (RecordHandle, &mut PublishedRecord)> {
    self.table.iter_mut().map(|(k, v)| (RecordHandle(k), v))
  }

  /// Resumable lookup by name and type (§4.1): `ANY` in `rtype` matches any
  /// stored type.
  pub fn lookup(&self, name: &str, rtype: RecordType, after: Option<RecordHandle>) -> Option<RecordHandle> {
    let hash = elf_hash_fold(name.as_bytes());
    self
      .table
      .lookup(hash, after.map(|h| h.0), |r| {
        rtype.matches(r.answer.rtype) && r.answer.name.eq_ignore_ascii_case(name)
      })
      .map(RecordHandle)
  }

  fn insert(&mut self, answer: Answer, unique: u8, conflict: Option<ConflictCallback>) -> RecordHandle {
    let hash = elf_hash_fold(answer.name.as_bytes());
    let record = PublishedRecord {
      answer,
      name_hash: hash,
      unique,
      tries: 0,
      queue: None,
      conflict,
    };
    RecordHandle(self.table.insert(hash, record))
  }

  fn check_capacity(&self, max: Option<usize>) -> Result<(), EngineError> {
    match max {
      Some(cap) if self.table.len() >= cap => {
        #[cfg(feature = "tracing")]
        tracing::warn!(cap, "record store arena exhausted");
        Err(EngineError::Exhausted { kind: ArenaKind::Records })
      }
      _ => Ok(()),
    }
  }

  /// `AllocShared` (§4.2): may announce freely, no probing. `max` is the
  /// configured capacity ceiling (`EngineOptions::max_records`); exceeding
  /// it surfaces `EngineError::Exhausted` rather than growing unbounded
  /// (§9b, the one place the reference source's fatal posture is softened).
  pub fn alloc_shared(&mut self, max: Option<usize>, name: impl Into<SmolStr>, rtype: RecordType, ttl: u32) -> Result<RecordHandle, EngineError> {
    let name = name.into();
    crate::name::validate(&name)?;
    self.check_capacity(max)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(name = %name, "record allocated (shared)");
    Ok(self.insert(Answer::new(name, rtype, ttl, Vec::new()), UNIQUE_SHARED, None))
  }

  /// `AllocUnique` (§4.2): enters probe state 1 immediately; the caller is
  /// expected to also arm the scheduler's probe deadline (`Scheduler::arm_probe`).
  pub fn alloc_unique(
    &mut self,
    max: Option<usize>,
    name: impl Into<SmolStr>,
    rtype: RecordType,
    ttl: u32,
    conflict: impl FnMut(&Answer) + 'static,
  ) -> Result<RecordHandle, EngineError> {
    let name = name.into();
    crate::name::validate(&name)?;
    self.check_capacity(max)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(name = %name, "record allocated (unique), entering probe state 1");
    Ok(self.insert(Answer::new(name, rtype, ttl, Vec::new()), 1, Some(Box::new(conflict))))
  }

  /// `SetRaw` (§4.2): replace the opaque rdata payload, then `PublishRecord`.
  pub fn set_raw(&mut self, sched: &mut Scheduler, clock: &dyn Clock, h: RecordHandle, rdata: Vec<u8>) {
    if let Some(r) = self.table.get_mut(h.0) {
      r.answer.rdata = rdata;
    }
    self.publish_record(sched, clock, h);
  }

  /// `SetHost` (§4.2): for NS/CNAME/PTR/SRV-target style records.
  pub fn set_host(&mut self, sched: &mut Scheduler, clock: &dyn Clock, h: RecordHandle, target: impl Into<SmolStr>) {
    if let Some(r) = self.table.get_mut(h.0) {
      r.answer.decoded.rdname = Some(target.into());
    }
    self.publish_record(sched, clock, h);
  }

  /// `SetIp` (§4.2): for A records.
  pub fn set_ip(&mut self, sched: &mut Scheduler, clock: &dyn Clock, h: RecordHandle, ip: core::net::Ipv4Addr) {
    if let Some(r) = self.table.get_mut(h.0) {
      r.answer.decoded.ip = Some(ip);
    }
    self.publish_record(sched, clock, h);
  }

  /// `SetSrv` (§4.2).
  pub fn set_srv(
    &mut self,
    sched: &mut Scheduler,
    clock: &dyn Clock,
    h: RecordHandle,
    priority: u16,
    weight: u16,
    port: u16,
    target: impl Into<SmolStr>,
  ) {
    if let Some(r) = self.table.get_mut(h.0) {
      r.answer.decoded.srv = Some(crate::answer::Srv { priority, weight, port });
      r.answer.decoded.rdname = Some(target.into());
    }
    self.publish_record(sched, clock, h);
  }

  /// `Done` (§4.2): if still probing, drop it outright; otherwise arm a
  /// TTL=0 goodbye announcement.
  pub fn done(&mut self, sched: &mut Scheduler, h: RecordHandle) {
    let Some(r) = self.table.get_mut(h.0) else { return };
    if r.is_probing() {
      #[cfg(feature = "tracing")]
      tracing::debug!(name = %r.answer.name, "record done while probing, discarding");
      let name_hash = r.name_hash;
      sched.remove_from_probing(h);
      self.table.remove(name_hash, h.0);
      return;
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(name = %r.answer.name, "record done, arming goodbye");
    r.answer.ttl = 0;
    sched.push_now(self, h);
  }

  /// `PublishRecord` (§4.2): a no-op while still probing; otherwise resets
  /// the retry counter and (re)arms immediate publication.
  pub fn publish_record(&mut self, sched: &mut Scheduler, clock: &dyn Clock, h: RecordHandle) {
    let Some(r) = self.table.get_mut(h.0) else { return };
    if r.is_probing() {
      return;
    }
    r.tries = 0;
    sched.arm_publish_now(clock);
    sched.push_publish(self, h);
  }

  /// `SendRecord` (§4.2): called when a peer's query didn't already know
  /// about this record, to schedule an announcement.
  pub fn send_record(&mut self, sched: &mut Scheduler, clock: &dyn Clock, rng: &mut dyn Rng, h: RecordHandle) {
    let Some(r) = self.table.get_mut(h.0) else { return };
    if r.tries < 4 {
      sched.arm_publish_now(clock);
      return;
    }
    if r.is_unique() {
      sched.push_now(self, h);
    } else {
      sched.push_paused(self, h, clock, rng);
    }
  }

  /// Fires the record's conflict callback with `reason`, then frees it.
  /// Used by the probing/response conflict paths (§4.6/§4.7).
  pub fn fire_conflict_and_remove(&mut self, sched: &mut Scheduler, h: RecordHandle, reason: &Answer) {
    sched.unqueue(self, h);
    sched.remove_from_probing(h);
    let Some(hash) = self.table.get(h.0).map(|r| r.name_hash) else { return };
    if let Some(mut r) = self.table.remove(hash, h.0) {
      #[cfg(feature = "tracing")]
      tracing::error!(name = %r.answer.name, "record conflict, withdrawing");
      if let Some(mut cb) = r.conflict.take() {
        cb(reason);
      }
    }
  }

  pub(crate) fn set_queue(&mut self, h: RecordHandle, q: Option<SendQueue>) {
    if let Some(r) = self.table.get_mut(h.0) {
      r.queue = q;
    }
  }

  pub(crate) fn queue_of(&self, h: RecordHandle) -> Option<SendQueue> {
    self.table.get(h.0).and_then(|r| r.queue)
  }

  pub(crate) fn name_hash(&self, h: RecordHandle) -> Option<u32> {
    self.table.get(h.0).map(|r| r.name_hash)
  }

  pub(crate) fn remove_raw(&mut self, h: RecordHandle) -> Option<PublishedRecord> {
    let hash = self.table.get(h.0)?.name_hash;
    self.table.remove(hash, h.0)
  }
}

impl Default for RecordStore {
  fn default() -> Self {
    Self::new()
  }
}
