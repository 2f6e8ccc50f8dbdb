//! The input processor (spec §4.6/§4.7): dispatches a decoded inbound
//! message into record-store answers, cache updates, and query fan-out.

use core::net::SocketAddr;

use smallvec_wrapper::TinyVec;

use crate::answer::Answer;
use crate::cache::Cache;
use crate::clock::{Clock, Rng};
use crate::codec::{InboundMessage, WireRecord};
use crate::query::QueryRegistry;
use crate::record_store::{RecordHandle, RecordStore, UNIQUE_PUBLISHED};
use crate::record_type::RecordType;
use crate::scheduler::{Scheduler, UnicastSlot};
use crate::EngineOptions;

const MDNS_PORT: u16 = 5353;

fn names_match(a: &Option<smol_str::SmolStr>, b: &Option<smol_str::SmolStr>) -> bool {
  match (a, b) {
    (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
    (None, None) => true,
    _ => false,
  }
}

/// `MatchAnswer` (§4.6): a type-aware equality between a wire record and a
/// stored answer.
pub fn match_answer(res: &WireRecord, ans: &Answer) -> bool {
  if !res.name.eq_ignore_ascii_case(&ans.name) {
    return false;
  }
  if res.rtype == RecordType::Any || ans.rtype == RecordType::Any {
    return true;
  }
  if res.rtype != ans.rtype {
    return false;
  }
  match res.rtype {
    RecordType::Srv => names_match(&res.decoded.rdname, &ans.decoded.rdname) && res.decoded.srv == ans.decoded.srv,
    RecordType::Ptr | RecordType::Ns | RecordType::Cname => names_match(&res.decoded.rdname, &ans.decoded.rdname),
    _ => res.rdata == ans.rdata,
  }
}

fn wire_to_answer(w: &WireRecord) -> Answer {
  Answer {
    name: w.name.clone(),
    rtype: w.rtype,
    ttl: w.ttl,
    rdata: w.rdata.clone(),
    decoded: w.decoded.clone(),
  }
}

/// Eagerly collects the (usually one or two entry) chain of records matching
/// `name`/`rtype` before any mutation starts, so a conflict handler removing
/// a record mid-pass can't invalidate the bucket cursor we're walking.
fn snapshot(records: &RecordStore, name: &str, rtype: RecordType) -> TinyVec<RecordHandle> {
  let mut out = TinyVec::new();
  let mut cursor = records.lookup(name, rtype, None);
  while let Some(h) = cursor {
    out.push(h);
    cursor = records.lookup(name, rtype, Some(h));
  }
  out
}

#[allow(clippy::too_many_arguments)]
fn process_query(
  records: &mut RecordStore,
  sched: &mut Scheduler,
  clock: &dyn Clock,
  rng: &mut dyn Rng,
  opts: &EngineOptions,
  msg: &InboundMessage,
  src: SocketAddr,
) {
  for q in &msg.questions {
    if q.class != opts.class {
      continue;
    }
    let handles = snapshot(records, &q.name, q.rtype);
    if handles.is_empty() {
      continue;
    }
    if src.port() != MDNS_PORT {
      sched.push_unicast(UnicastSlot {
        record: handles[0],
        question_name: q.name.clone(),
        question_type: q.rtype,
        message_id: msg.id,
        destination: src,
      });
    }
    for h in handles {
      let Some(rec) = records.get(h) else { continue };
      if rec.is_probing() {
        let mut matched = false;
        let mut offending: Option<WireRecord> = None;
        for ns in &msg.authorities {
          if ns.ttl == 0 || !ns.name.eq_ignore_ascii_case(&rec.answer.name) || !ns.rtype.matches(rec.answer.rtype) {
            continue;
          }
          if match_answer(ns, &rec.answer) {
            matched = true;
          } else if offending.is_none() {
            offending = Some(ns.clone());
          }
        }
        if !matched {
          if let Some(ns) = offending {
            let reason = wire_to_answer(&ns);
            records.fire_conflict_and_remove(sched, h, &reason);
          }
        }
      } else {
        let mut suppressed = false;
        for an in &msg.answers {
          if !an.name.eq_ignore_ascii_case(&rec.answer.name) || !an.rtype.matches(rec.answer.rtype) {
            continue;
          }
          if match_answer(an, &rec.answer) {
            suppressed = true;
            break;
          }
        }
        if !suppressed {
          records.send_record(sched, clock, rng, h);
        }
      }
    }
  }
}

fn process_response(records: &mut RecordStore, cache: &mut Cache, queries: &mut QueryRegistry, sched: &mut Scheduler, opts: &EngineOptions, clock: &dyn Clock, msg: &InboundMessage) {
  let now = clock.now_secs() as u64;
  for a in &msg.answers {
    let handles = snapshot(records, &a.name, a.rtype);
    let mut matched = false;
    let mut unique_handles = Vec::new();
    for h in &handles {
      let Some(rec) = records.get(*h) else { continue };
      if rec.unique != UNIQUE_PUBLISHED {
        continue;
      }
      if match_answer(a, &rec.answer) {
        matched = true;
      } else {
        unique_handles.push(*h);
      }
    }
    if !matched && a.ttl != 0 {
      let reason = wire_to_answer(a);
      for h in unique_handles {
        records.fire_conflict_and_remove(sched, h, &reason);
      }
    }

    let (ch, goodbyes) = cache.add_resource(a, now, opts.cache_ttl_divisor, opts.cache_ttl_margin, opts.max_cache_entries);
    for (qh, goodbye) in goodbyes {
      if queries.answer(qh, &goodbye) {
        queries.unregister(qh);
      }
    }

    if let Some(ch) = ch {
      if let Some(qh) = queries.find(&a.name, a.rtype) {
        cache.set_query(ch, Some(qh));
        if let Some(entry) = cache.get(ch) {
          let answer = entry.answer.clone();
          if queries.answer(qh, &answer) {
            queries.unregister(qh);
          }
        }
      }
    }
  }
}

/// `Input` (§4.6): dispatches `msg` as a query or a response.
#[allow(clippy::too_many_arguments)]
pub fn process(
  records: &mut RecordStore,
  cache: &mut Cache,
  queries: &mut QueryRegistry,
  sched: &mut Scheduler,
  clock: &dyn Clock,
  rng: &mut dyn Rng,
  opts: &EngineOptions,
  msg: &InboundMessage,
  src: SocketAddr,
) {
  if msg.query {
    process_query(records, sched, clock, rng, opts, msg, src);
  } else {
    process_response(records, cache, queries, sched, opts, clock, msg);
  }
}
