//! Scenario tests (spec §8): exercise the public [`Engine`] API end to end,
//! the way a host actually drives it — `alloc_*`/`query` to set up state,
//! `input`/`output` in a loop, `FakeClock`/`FakeRng` standing in for the
//! wall clock and PRNG external collaborators (§9d).

use core::net::{Ipv4Addr, SocketAddr};
use core::time::Duration;
use std::cell::RefCell;
use std::rc::Rc;

use crate::answer::Answer;
use crate::clock::{FakeClock, FakeRng};
use crate::codec::{mdns_group, InboundMessage, Question, WireRecord};
use crate::query::QueryOutcome;
use crate::record_type::RecordType;
use crate::scheduler::SendQueue;
use crate::{Engine, EngineOptions, MDNS_PORT};

fn peer(port: u16) -> SocketAddr {
  SocketAddr::new(Ipv4Addr::new(192, 168, 1, 50).into(), port)
}

fn engine_at(start_secs: u32) -> Engine<FakeClock, FakeRng> {
  Engine::new(EngineOptions::default(), FakeClock::new(start_secs), FakeRng::new())
}

// §8 scenario 1: probe with no response.
#[test]
fn probe_with_no_conflict_runs_four_steps_then_publishes() {
  let mut e = engine_at(1_000);
  let h = e.alloc_unique("host.local", RecordType::A, 120, |_: &Answer| panic!("no conflict expected")).unwrap();
  e.set_raw(h, vec![10, 0, 0, 5]);

  // Call 1: ANY question plus the tentative answer in `ns`; unique 1 -> 2.
  let (msg, dst) = e.output().expect("probe round 1");
  assert_eq!(dst, mdns_group(MDNS_PORT));
  assert!(!msg.qr && !msg.aa);
  assert_eq!(msg.qd.len(), 1);
  assert_eq!(msg.qd[0].name, "host.local");
  assert_eq!(msg.qd[0].rtype, RecordType::Any);
  assert_eq!(msg.ns.len(), 1);
  assert_eq!(msg.ns[0].rdata, vec![10, 0, 0, 5]);
  assert!(msg.an.is_empty());

  // Calls 2 and 3: unique 2 -> 3 -> 4, same shape each time.
  for _ in 0..2 {
    e.clock.advance(Duration::from_millis(250));
    let (msg, _) = e.output().expect("probe round");
    assert_eq!(msg.qd.len(), 1);
    assert_eq!(msg.ns.len(), 1);
  }

  // Call 4: the probe completes (unique -> 5) but nothing is ready to
  // announce yet, so this tick has nothing to say.
  e.clock.advance(Duration::from_millis(250));
  assert!(e.output().is_none());

  // Call 5: the completed record's publish deadline was armed immediately,
  // so it announces now, cache-flush bit set.
  e.clock.advance(Duration::from_millis(250));
  let (msg, _) = e.output().expect("announcement");
  assert!(msg.qr && msg.aa);
  assert_eq!(msg.an.len(), 1);
  assert_eq!(msg.an[0].class, 0x8001);
  assert_eq!(msg.an[0].ttl, 120);
  assert_eq!(msg.an[0].rdata, vec![10, 0, 0, 5]);
}

// §8 scenario 2: probe with conflict.
#[test]
fn probe_conflict_destroys_record_and_stops_probing() {
  let mut e = engine_at(2_000);
  let conflicts = Rc::new(RefCell::new(0u32));
  let seen = conflicts.clone();
  let h = e.alloc_unique("host.local", RecordType::A, 120, move |_ans: &Answer| *seen.borrow_mut() += 1).unwrap();
  e.set_raw(h, vec![10, 0, 0, 5]);

  // One probe round before the conflict arrives (unique 1 -> 2).
  e.output().expect("probe round 1");

  let mut msg = InboundMessage::query(99);
  msg.questions.push(Question {
    name: "host.local".into(),
    rtype: RecordType::A,
    class: 1,
  });
  msg.authorities.push(WireRecord::new("host.local", RecordType::A, 1, 120, vec![10, 0, 0, 9]));
  e.input(&msg, peer(MDNS_PORT));

  assert_eq!(*conflicts.borrow(), 1);
  assert!(e.records.get(h).is_none());

  // No more probing: the record is gone, so nothing further is ever sent
  // about `host.local`.
  for _ in 0..3 {
    e.clock.advance(Duration::from_millis(250));
    if let Some((out, _)) = e.output() {
      assert!(out.qd.iter().all(|q| q.name != "host.local"));
      assert!(out.ns.iter().all(|r| r.name != "host.local"));
      assert!(out.an.iter().all(|r| r.name != "host.local"));
    }
  }
}

// §8 scenario 3: shared announce. §4.2's `PublishRecord` arms the publish
// deadline immediately (no jitter) for the *first* announcement, so this
// engine answers as soon as `Output` is next called rather than waiting out
// a fixed delay — see DESIGN.md's "Open Question" note on this scenario.
#[test]
fn shared_record_announces_ptr() {
  let mut e = engine_at(3_000);
  let h = e.alloc_shared("_http._tcp.local", RecordType::Ptr, 120).unwrap();
  e.set_host(h, "web.local");

  let (msg, dst) = e.output().expect("ptr announce");
  assert_eq!(dst, mdns_group(MDNS_PORT));
  assert!(msg.qr && msg.aa);
  assert_eq!(msg.an.len(), 1);
  assert_eq!(msg.an[0].rtype, RecordType::Ptr);
  assert_eq!(msg.an[0].decoded.rdname.as_deref(), Some("web.local"));
  assert_eq!(msg.an[0].ttl, 120);
  // Shared records never carry the cache-flush bit.
  assert_eq!(msg.an[0].class, 1);
}

// §8 scenario 4: query fan-out.
#[test]
fn query_fan_out_delivers_cached_answer() {
  let mut e = engine_at(4_000);
  let received = Rc::new(RefCell::new(Vec::<Answer>::new()));
  let sink = received.clone();
  e.query("host.local", RecordType::A, move |a: &Answer| {
    sink.borrow_mut().push(a.clone());
    QueryOutcome::Continue
  })
  .unwrap();

  // Empty cache: Output asks the question.
  let (msg, _) = e.output().expect("query question");
  assert_eq!(msg.qd.len(), 1);
  assert_eq!(msg.qd[0].name, "host.local");
  assert_eq!(msg.qd[0].rtype, RecordType::A);

  // A peer answers with ttl=60.
  let mut resp = InboundMessage::response(7);
  resp.answers.push(WireRecord::new("host.local", RecordType::A, 1, 60, vec![10, 0, 0, 1]));
  e.input(&resp, peer(MDNS_PORT));

  // The callback fires once, delivered with the cache entry's *absolute*
  // expiry (§4.3/§4.4: `now + ttl/2 + 8`), not the wire ttl itself.
  let got = received.borrow();
  assert_eq!(got.len(), 1);
  assert_eq!(got[0].ttl, 4_000 + 60 / 2 + 8);
  drop(got);

  let (_, cached) = e.list_cached_answers("host.local", RecordType::A, None).expect("cached entry");
  assert_eq!(cached.ttl, 4_000 + 60 / 2 + 8);
}

// §8 scenario 5: goodbye.
#[test]
fn goodbye_after_done_emits_ttl_zero_then_nothing() {
  let mut e = engine_at(5_000);
  let h = e.alloc_shared("_http._tcp.local", RecordType::Ptr, 120).unwrap();
  e.set_host(h, "web.local");
  // Drain the initial announce so only the goodbye is left to observe.
  e.output().expect("initial announce");

  e.done(h);
  let (msg, _) = e.output().expect("goodbye");
  assert_eq!(msg.an.len(), 1);
  assert_eq!(msg.an[0].ttl, 0);
  assert_eq!(msg.an[0].rtype, RecordType::Ptr);
  assert!(e.records.get(h).is_none());

  assert!(e.output().is_none());
}

// §8 scenario 6: unicast reply.
#[test]
fn unicast_reply_answers_non_mdns_port_before_anything_else() {
  let mut e = engine_at(6_000);
  let h = e.alloc_shared("host.local", RecordType::A, 120).unwrap();
  e.set_raw(h, vec![10, 0, 0, 7]);

  let mut q = InboundMessage::query(42);
  q.questions.push(Question {
    name: "host.local".into(),
    rtype: RecordType::A,
    class: 1,
  });
  let requester = peer(54321);
  e.input(&q, requester);

  let (msg, dst) = e.output().expect("unicast reply");
  assert_eq!(dst, requester);
  assert_eq!(msg.id, 42);
  assert!(msg.qr && msg.aa);
  assert_eq!(msg.qd.len(), 1);
  assert_eq!(msg.qd[0].name, "host.local");
  assert_eq!(msg.an.len(), 1);
  assert_eq!(msg.an[0].rdata, vec![10, 0, 0, 7]);
}

// §8 boundary behavior: frame limit splits a batch across two Output calls
// and leaves the queue non-empty in between.
#[test]
fn frame_limit_splits_publish_batch_across_two_calls() {
  let opts = EngineOptions::default().with_frame_size(100);
  let mut e = Engine::new(opts, FakeClock::new(9_000), FakeRng::new());
  let h1 = e.alloc_shared("a.local", RecordType::Txt, 120).unwrap();
  let h2 = e.alloc_shared("b.local", RecordType::Txt, 120).unwrap();
  e.set_raw(h1, vec![0u8; 40]);
  e.set_raw(h2, vec![0u8; 40]);

  let (first, _) = e.output().expect("first batch");
  assert_eq!(first.an.len(), 1);
  assert_eq!(first.an[0].name, "a.local");
  assert_eq!(e.records.queue_of(h1), Some(SendQueue::Publish));
  assert_eq!(e.records.queue_of(h2), Some(SendQueue::Publish));

  e.clock.advance(Duration::from_secs(2));
  let (second, _) = e.output().expect("second batch");
  assert_eq!(second.an.len(), 1);
  assert_eq!(second.an[0].name, "b.local");
}

// §8 round-trip: registering then unregistering a query is a no-op on the
// registry's size.
#[test]
fn query_register_then_unregister_restores_empty_registry() {
  let mut e = engine_at(8_000);
  assert!(e.queries.is_empty());
  let id = e.query("a.local", RecordType::A, |_: &Answer| QueryOutcome::Continue).unwrap();
  assert_eq!(e.queries.len(), 1);
  e.unquery(id);
  assert!(e.queries.is_empty());
}

// §8 round-trip: AllocShared followed by Done, with no publishing in
// between, leaves the store empty after the goodbye ships.
#[test]
fn alloc_then_immediate_done_leaves_store_empty_after_one_output() {
  let mut e = engine_at(10_000);
  assert!(e.records.is_empty());
  let h = e.alloc_shared("transient.local", RecordType::Txt, 120).unwrap();
  assert_eq!(e.records.len(), 1);
  e.done(h);

  let (msg, _) = e.output().expect("goodbye");
  assert_eq!(msg.an.len(), 1);
  assert_eq!(msg.an[0].ttl, 0);
  assert!(e.records.is_empty());
}

// Shutdown must free a still-probing record outright rather than stranding
// it: once shutting_down is set, Output never runs the probing step again,
// so a record left mid-probe could otherwise never complete, conflict, or
// say goodbye.
#[test]
fn shutdown_frees_still_probing_records() {
  let mut e = engine_at(11_000);
  let h = e.alloc_unique("host.local", RecordType::A, 120, |_: &Answer| panic!("no conflict expected")).unwrap();
  assert!(e.records.get(h).unwrap().is_probing());

  e.shutdown();
  assert!(e.records.get(h).is_none());
  assert!(e.output().is_none());
}

// Name validation (§9b): malformed names surface EngineError rather than
// being silently accepted.
#[test]
fn alloc_and_query_reject_malformed_names() {
  let mut e = engine_at(12_000);
  assert!(matches!(e.alloc_shared("", RecordType::A, 120), Err(crate::EngineError::NotFqdn(_))));
  assert!(matches!(e.alloc_shared("bare", RecordType::A, 120), Err(crate::EngineError::NotFqdn(_))));
  assert!(matches!(e.query("nodot", RecordType::A, |_: &Answer| QueryOutcome::Continue), Err(crate::EngineError::NotFqdn(_))));
  assert!(e.alloc_shared("host.local", RecordType::A, 120).is_ok());
}
