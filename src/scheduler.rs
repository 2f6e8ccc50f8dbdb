//! The send scheduler (spec §4.5): five send queues, three deadlines, and
//! the single-datagram-per-tick `Output` algorithm.

use std::collections::VecDeque;
use core::net::SocketAddr;
use core::time::Duration;

use smol_str::SmolStr;

use crate::answer::Answer;
use crate::cache::Cache;
use crate::clock::{Clock, Rng};
use crate::codec::{mdns_group, OutboundMessage, WireRecord};
use crate::query::QueryRegistry;
use crate::record_store::{RecordHandle, RecordStore, UNIQUE_PROBE_MAX, UNIQUE_PUBLISHED};
use crate::record_type::RecordType;
use crate::EngineOptions;

const MDNS_PORT: u16 = 5353;

/// Which of the three mutually-exclusive queues a record is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendQueue {
  Now,
  Paused,
  Publish,
}

/// A pending unicast reply (§4.5 step 1): a non-5353 source port asked a
/// question we can answer, so the reply must go back to that exact port
/// rather than to the multicast group.
pub struct UnicastSlot {
  pub record: RecordHandle,
  pub question_name: SmolStr,
  pub question_type: RecordType,
  pub message_id: u16,
  pub destination: SocketAddr,
}

fn answer_to_wire(class: u16, answer: &Answer, flush: bool) -> WireRecord {
  WireRecord {
    name: answer.name.clone(),
    rtype: answer.rtype,
    class: if flush { class | 0x8000 } else { class },
    ttl: answer.ttl,
    rdata: answer.rdata.clone(),
    decoded: answer.decoded.clone(),
  }
}

fn duration_until(deadline_us: u64, now_us: u64) -> Duration {
  Duration::from_micros(deadline_us.saturating_sub(now_us))
}

pub struct Scheduler {
  now_q: VecDeque<RecordHandle>,
  paused_q: VecDeque<RecordHandle>,
  publish_q: VecDeque<RecordHandle>,
  probing: Vec<RecordHandle>,
  unicast: Vec<UnicastSlot>,
  pause_deadline_us: u64,
  probe_deadline_us: u64,
  publish_deadline_us: u64,
  expireall_secs: u64,
  shutting_down: bool,
  opts: EngineOptions,
}

impl Scheduler {
  pub fn new(opts: &EngineOptions) -> Self {
    Self {
      now_q: VecDeque::new(),
      paused_q: VecDeque::new(),
      publish_q: VecDeque::new(),
      probing: Vec::new(),
      unicast: Vec::new(),
      pause_deadline_us: 0,
      probe_deadline_us: 0,
      publish_deadline_us: 0,
      expireall_secs: 0,
      shutting_down: false,
      opts: *opts,
    }
  }

  pub fn shutdown(&mut self) {
    self.shutting_down = true;
  }

  pub fn is_shutting_down(&self) -> bool {
    self.shutting_down
  }

  pub fn push_unicast(&mut self, slot: UnicastSlot) {
    self.unicast.push(slot);
  }

  pub fn add_probing(&mut self, h: RecordHandle, clock: &dyn Clock) {
    if !self.probing.contains(&h) {
      self.probing.push(h);
    }
    self.probe_deadline_us = clock.now_micros();
  }

  pub fn remove_from_probing(&mut self, h: RecordHandle) {
    self.probing.retain(|k| *k != h);
  }

  pub fn arm_publish_now(&mut self, clock: &dyn Clock) {
    self.publish_deadline_us = clock.now_micros();
  }

  fn unqueue_from(&mut self, queue: SendQueue, h: RecordHandle) {
    match queue {
      SendQueue::Now => self.now_q.retain(|k| *k != h),
      SendQueue::Paused => self.paused_q.retain(|k| *k != h),
      SendQueue::Publish => self.publish_q.retain(|k| *k != h),
    }
  }

  /// Unlinks `h` from whichever of the three send queues it's on, if any
  /// (§3 invariant: a record is on at most one at a time).
  pub fn unqueue(&mut self, records: &mut RecordStore, h: RecordHandle) {
    if let Some(q) = records.queue_of(h) {
      self.unqueue_from(q, h);
      records.set_queue(h, None);
    }
  }

  fn enqueue(&mut self, records: &mut RecordStore, h: RecordHandle, queue: SendQueue) -> bool {
    if records.queue_of(h) == Some(queue) {
      return false; // already queued here: PushRecord dedup (§4.5 "Ordering")
    }
    self.unqueue(records, h);
    records.set_queue(h, Some(queue));
    #[cfg(feature = "tracing")]
    if let Some(rec) = records.get(h) {
      tracing::debug!(name = %rec.answer.name, queue = ?queue, "record queued");
    }
    match queue {
      SendQueue::Now => self.now_q.push_back(h),
      SendQueue::Paused => self.paused_q.push_back(h),
      SendQueue::Publish => self.publish_q.push_back(h),
    }
    true
  }

  pub fn push_now(&mut self, records: &mut RecordStore, h: RecordHandle) {
    self.enqueue(records, h, SendQueue::Now);
  }

  pub fn push_publish(&mut self, records: &mut RecordStore, h: RecordHandle) {
    self.enqueue(records, h, SendQueue::Publish);
  }

  /// Schedules `h` on `a_paused`, re-rolling the shared pause deadline to
  /// `now + uniform(jitter)` every time, mirroring the reference source's
  /// unconditional reset rather than a soonest-wins merge.
  pub fn push_paused(&mut self, records: &mut RecordStore, h: RecordHandle, clock: &dyn Clock, rng: &mut dyn Rng) {
    self.enqueue(records, h, SendQueue::Paused);
    let (lo, hi) = self.opts.shared_jitter_ms;
    let jitter_us = rng.uniform_range(lo, hi) as u64 * 1_000;
    self.pause_deadline_us = clock.now_micros() + jitter_us;
  }

  fn drain_plain(queue: &mut VecDeque<RecordHandle>, records: &mut RecordStore, msg: &mut OutboundMessage, class: u16, frame_size: usize) -> bool {
    while let Some(h) = queue.pop_front() {
      let Some(rec) = records.get(h) else { continue };
      let wire = answer_to_wire(class, &rec.answer, rec.is_unique());
      let is_goodbye = rec.answer.ttl == 0;
      let cost = OutboundMessage::cost_of(&wire);
      if msg.encoded_len() + cost > frame_size {
        queue.push_front(h);
        return false;
      }
      if is_goodbye {
        // A TTL=0 announcement completes the record's lifecycle (§3:
        // "destroyed ... by sending a TTL=0 announcement").
        records.remove_raw(h);
      } else {
        records.set_queue(h, None);
      }
      msg.an(wire);
    }
    true
  }

  fn drain_publish(&mut self, records: &mut RecordStore, msg: &mut OutboundMessage) -> bool {
    let class = self.opts.class;
    let frame_size = self.opts.frame_size;
    let mut requeue = VecDeque::new();
    let mut fit = true;
    while let Some(h) = self.publish_q.pop_front() {
      let Some(rec) = records.get(h) else { continue };
      let wire = answer_to_wire(class, &rec.answer, rec.is_unique());
      let cost = OutboundMessage::cost_of(&wire);
      if msg.encoded_len() + cost > frame_size {
        self.publish_q.push_front(h);
        fit = false;
        break;
      }
      msg.an(wire);
      let rec = records.get_mut(h).unwrap();
      rec.tries += 1;
      let done = rec.answer.ttl == 0;
      let tries = rec.tries;
      if done {
        records.set_queue(h, None);
        records.remove_raw(h);
      } else if tries < 4 {
        requeue.push_back(h);
      } else {
        records.set_queue(h, None);
      }
    }
    self.publish_q.extend(requeue);
    if !self.publish_q.is_empty() {
      self.publish_deadline_us += self.opts.publish_retry_secs * 1_000_000;
    }
    fit
  }

  fn run_probing(&mut self, records: &mut RecordStore, clock: &dyn Clock, msg: &mut OutboundMessage) {
    let class = self.opts.class;
    let snapshot = self.probing.clone();
    let mut completed = Vec::new();
    for h in &snapshot {
      match records.get(*h) {
        Some(rec) if rec.unique >= UNIQUE_PROBE_MAX => completed.push(*h),
        Some(rec) => {
          msg.qd(&rec.answer.name, RecordType::Any, class);
        }
        None => {}
      }
    }
    for h in completed {
      self.probing.retain(|k| *k != h);
      if let Some(rec) = records.get_mut(h) {
        rec.unique = UNIQUE_PUBLISHED;
        #[cfg(feature = "tracing")]
        tracing::debug!(name = %rec.answer.name, "probing complete, publishing");
      }
      records.publish_record(self, clock, h);
    }
    let remaining = self.probing.clone();
    for h in remaining {
      if let Some(rec) = records.get_mut(h) {
        let wire = answer_to_wire(class, &rec.answer, false);
        msg.ns(wire);
        rec.unique += 1;
        #[cfg(feature = "tracing")]
        tracing::debug!(name = %rec.answer.name, step = rec.unique, "probe step advanced");
      }
    }
    self.probe_deadline_us = clock.now_micros() + self.opts.probe_interval_ms * 1_000;
  }

  fn run_query_retries(&mut self, records: &RecordStore, cache: &mut Cache, queries: &mut QueryRegistry, clock: &dyn Clock, msg: &mut OutboundMessage) {
    let _ = records;
    let now = clock.now_secs() as u64;
    let class = self.opts.class;
    let frame_size = self.opts.frame_size;
    let due = queries.due(now);

    // Pass A: ask again for everything still under the retry cap.
    for h in &due {
      let Some(q) = queries.get(*h) else { continue };
      if q.tries >= self.opts.query_tries_limit {
        continue;
      }
      let cost = OutboundMessage::cost_of_question(&q.name);
      if msg.encoded_len() + cost > frame_size {
        break;
      }
      msg.qd(&q.name, q.rtype, class);
    }

    // Pass B: give up exhausted queries, bump the rest, attach known answers.
    for h in due {
      let Some(q) = queries.get(h) else { continue };
      let (name, rtype, tries) = (q.name.clone(), q.rtype, q.tries);
      if tries >= self.opts.query_tries_limit {
        #[cfg(feature = "tracing")]
        tracing::warn!(name = %name, "query retries exhausted, giving up");
        let idx = cache.bucket_index_for(&name);
        let fired = cache.expire_bucket(idx, now);
        for (qh, goodbye) in fired {
          if queries.answer(qh, &goodbye) {
            queries.unregister(qh);
          }
        }
        let ttls = cache.matching_ttls(&name, rtype);
        queries.reset(h, ttls, now);
        continue;
      }
      if let Some(q) = queries.get_mut(h) {
        q.tries += 1;
        q.nexttry = now + q.tries as u64;
      }
      let mut cursor = cache.list(&name, rtype, None);
      while let Some(c) = cursor {
        if let Some(entry) = cache.get(c) {
          if entry.remaining(now) > 8 {
            let wire = answer_to_wire(class, &entry.answer, false);
            let cost = OutboundMessage::cost_of(&wire);
            if msg.encoded_len() + cost > frame_size {
              break;
            }
            msg.an(wire);
          }
        }
        cursor = cache.list(&name, rtype, Some(c));
      }
    }
  }

  /// The `Output` algorithm (§4.5): one datagram, strict priority order.
  pub fn build_output(
    &mut self,
    records: &mut RecordStore,
    cache: &mut Cache,
    queries: &mut QueryRegistry,
    clock: &dyn Clock,
    port: u16,
  ) -> Option<(OutboundMessage, SocketAddr)> {
    let class = self.opts.class;
    let frame_size = self.opts.frame_size;
    let now_us = clock.now_micros();
    let now_secs = clock.now_secs() as u64;

    // 1. Unicast slot.
    while let Some(slot) = self.unicast.pop() {
      if let Some(rec) = records.get(slot.record) {
        let mut msg = OutboundMessage::new();
        msg.set_header(slot.message_id, true, true);
        msg.qd(&slot.question_name, slot.question_type, class);
        msg.an(answer_to_wire(class, &rec.answer, rec.is_unique()));
        return Some((msg, slot.destination));
      }
    }

    // 2. Multicast defaults.
    let mut msg = OutboundMessage::new();
    msg.set_header(0, true, true);
    let destination = mdns_group(if port == 0 { MDNS_PORT } else { port });

    // 3. Immediate queue.
    if !Self::drain_plain(&mut self.now_q, records, &mut msg, class, frame_size) {
      return Some((msg, destination));
    }

    // 4. Publish queue.
    if now_us >= self.publish_deadline_us && !self.publish_q.is_empty() {
      if !self.drain_publish(records, &mut msg) {
        return Some((msg, destination));
      }
    }

    // 5. Shutting down: return whatever we have.
    if self.shutting_down {
      return if msg.is_empty() { None } else { Some((msg, destination)) };
    }

    // 6. Paused queue.
    if now_us >= self.pause_deadline_us && !self.paused_q.is_empty() {
      if !Self::drain_plain(&mut self.paused_q, records, &mut msg, class, frame_size) {
        return Some((msg, destination));
      }
    }

    // 7. Any answers emitted so far: return.
    if msg.answer_count() > 0 {
      return Some((msg, destination));
    }

    // 8. Probing.
    if now_us >= self.probe_deadline_us && !self.probing.is_empty() {
      self.run_probing(records, clock, &mut msg);
      msg.set_header(0, false, false);
      // A probe step that only completed records (no remaining probe to
      // re-announce) emits nothing this tick; don't hand the host an empty
      // datagram to send.
      return if msg.is_empty() { None } else { Some((msg, destination)) };
    }

    // 9. Query retries.
    if let Some(check) = queries.checkqlist() {
      if now_secs >= check {
        self.run_query_retries(records, cache, queries, clock, &mut msg);
      }
    }

    // 10. Cache GC.
    if now_secs > self.expireall_secs {
      let fired = cache.gc(now_secs);
      for (qh, goodbye) in fired {
        if queries.answer(qh, &goodbye) {
          queries.unregister(qh);
        }
      }
      self.expireall_secs = now_secs + self.opts.gc_interval_secs;
    }

    if msg.is_empty() {
      None
    } else {
      Some((msg, destination))
    }
  }

  /// `MaxSleepTime` (§4.5): how long the host may safely wait before the
  /// next `Output` call.
  pub fn max_sleep_time(&self, queries: &QueryRegistry, clock: &dyn Clock) -> Duration {
    let now_us = clock.now_micros();
    if !self.unicast.is_empty() || !self.now_q.is_empty() {
      return Duration::ZERO;
    }
    if !self.paused_q.is_empty() {
      return duration_until(self.pause_deadline_us, now_us);
    }
    if !self.probing.is_empty() {
      return duration_until(self.probe_deadline_us, now_us);
    }
    if !self.publish_q.is_empty() {
      return duration_until(self.publish_deadline_us, now_us);
    }
    if let Some(next) = queries.checkqlist() {
      return duration_until(next * 1_000_000, now_us);
    }
    duration_until(self.expireall_secs * 1_000_000, now_us)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{FakeClock, FakeRng};
  use crate::record_type::RecordType;

  #[test]
  fn push_now_then_drain_clears_queue_membership() {
    let opts = EngineOptions::default();
    let mut records = RecordStore::new();
    let mut sched = Scheduler::new(&opts);
    let h = records.alloc_shared(None, "svc.local", RecordType::Ptr, 120).unwrap();
    sched.push_now(&mut records, h);
    assert_eq!(records.queue_of(h), Some(SendQueue::Now));
    let mut msg = OutboundMessage::new();
    assert!(Scheduler::drain_plain(&mut sched.now_q, &mut records, &mut msg, 1, opts.frame_size));
    assert_eq!(records.queue_of(h), None);
    assert_eq!(msg.answer_count(), 1);
  }

  #[test]
  fn push_paused_sets_jitter_deadline() {
    let opts = EngineOptions::default();
    let mut records = RecordStore::new();
    let mut sched = Scheduler::new(&opts);
    let clock = FakeClock::new(1000);
    let mut rng = FakeRng::new();
    let h = records.alloc_shared(None, "svc.local", RecordType::Ptr, 120).unwrap();
    sched.push_paused(&mut records, h, &clock, &mut rng);
    assert_eq!(sched.pause_deadline_us, clock.now_micros() + 70_000);
  }

  #[test]
  fn max_sleep_time_is_zero_with_now_queue_nonempty() {
    let opts = EngineOptions::default();
    let mut records = RecordStore::new();
    let queries = QueryRegistry::new();
    let mut sched = Scheduler::new(&opts);
    let clock = FakeClock::new(1000);
    let h = records.alloc_shared(None, "svc.local", RecordType::Ptr, 120).unwrap();
    sched.push_now(&mut records, h);
    assert_eq!(sched.max_sleep_time(&queries, &clock), Duration::ZERO);
  }
}
