//! The codec contract (spec §6): the engine consumes already-decoded
//! inbound messages and produces decoded outbound messages. Turning either
//! one into or out of wire bytes is the host's job, using whatever DNS
//! codec it likes — this module only defines the shapes they exchange.

use core::net::{IpAddr, SocketAddr};

use smol_str::SmolStr;

use crate::answer::Decoded;
use crate::record_type::RecordType;

/// A question as carried in a message's `qd` section.
#[derive(Debug, Clone)]
pub struct Question {
  pub name: SmolStr,
  pub rtype: RecordType,
  pub class: u16,
}

/// A resource record as carried in a decoded message's `an`/`ns`/`ar`
/// sections. `class` retains the cache-flush bit (bit 15) if the sender set
/// it; callers that need the bare class should mask it off.
#[derive(Debug, Clone)]
pub struct WireRecord {
  pub name: SmolStr,
  pub rtype: RecordType,
  pub class: u16,
  pub ttl: u32,
  pub rdata: Vec<u8>,
  pub decoded: Decoded,
}

impl WireRecord {
  pub fn new(name: impl Into<SmolStr>, rtype: RecordType, class: u16, ttl: u32, rdata: Vec<u8>) -> Self {
    Self {
      name: name.into(),
      rtype,
      class,
      ttl,
      rdata,
      decoded: Decoded::default(),
    }
  }

  #[inline]
  pub fn cache_flush(&self) -> bool {
    self.class & 0x8000 != 0
  }

  #[inline]
  pub fn class_without_flush(&self) -> u16 {
    self.class & 0x7fff
  }
}

/// A fully decoded inbound datagram plus its source address, exactly as the
/// host's codec produced it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
  pub id: u16,
  pub query: bool,
  pub questions: Vec<Question>,
  pub answers: Vec<WireRecord>,
  pub authorities: Vec<WireRecord>,
  pub additionals: Vec<WireRecord>,
}

impl InboundMessage {
  pub fn query(id: u16) -> Self {
    Self {
      id,
      query: true,
      questions: Vec::new(),
      answers: Vec::new(),
      authorities: Vec::new(),
      additionals: Vec::new(),
    }
  }

  pub fn response(id: u16) -> Self {
    Self {
      id,
      query: false,
      questions: Vec::new(),
      answers: Vec::new(),
      authorities: Vec::new(),
      additionals: Vec::new(),
    }
  }
}

/// A rough estimate of how many bytes a name takes on the wire (label
/// length bytes plus the trailing root octet), used only to keep the
/// engine's frame-budget accounting honest without actually encoding
/// anything.
pub(crate) fn estimated_name_len(name: &str) -> usize {
  name.split('.').filter(|s| !s.is_empty()).map(|l| l.len() + 1).sum::<usize>() + 1
}

const HEADER_LEN: usize = 12;
const QUESTION_FIXED_LEN: usize = 4; // type + class
const RECORD_FIXED_LEN: usize = 10; // type + class + ttl + rdlength

/// An outbound datagram under construction. The engine appends questions
/// and records via the message-builder operations named in spec §6; the
/// host reads the fields back out to serialize them with its own codec.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
  pub id: u16,
  pub qr: bool,
  pub aa: bool,
  pub qd: Vec<Question>,
  pub an: Vec<WireRecord>,
  pub ns: Vec<WireRecord>,
  len: usize,
}

impl OutboundMessage {
  pub fn new() -> Self {
    Self {
      id: 0,
      qr: false,
      aa: false,
      qd: Vec::new(),
      an: Vec::new(),
      ns: Vec::new(),
      len: HEADER_LEN,
    }
  }

  pub fn set_header(&mut self, id: u16, qr: bool, aa: bool) -> &mut Self {
    self.id = id;
    self.qr = qr;
    self.aa = aa;
    self
  }

  pub fn qd(&mut self, name: &str, rtype: RecordType, class: u16) -> &mut Self {
    self.len += estimated_name_len(name) + QUESTION_FIXED_LEN;
    self.qd.push(Question {
      name: SmolStr::new(name),
      rtype,
      class,
    });
    self
  }

  pub fn an(&mut self, record: WireRecord) -> &mut Self {
    self.len += estimated_name_len(&record.name) + RECORD_FIXED_LEN + record.rdata.len();
    self.an.push(record);
    self
  }

  pub fn ns(&mut self, record: WireRecord) -> &mut Self {
    self.len += estimated_name_len(&record.name) + RECORD_FIXED_LEN + record.rdata.len();
    self.ns.push(record);
    self
  }

  /// The estimated encoded length of the message as built so far, used to
  /// enforce `frame_size_limit` (§4.5) before a section is drained.
  #[inline]
  pub fn encoded_len(&self) -> usize {
    self.len
  }

  /// Cost, in estimated bytes, of appending `record` to `an`/`ns` — used to
  /// decide *before* appending whether the frame would overflow.
  #[inline]
  pub fn cost_of(record: &WireRecord) -> usize {
    estimated_name_len(&record.name) + RECORD_FIXED_LEN + record.rdata.len()
  }

  #[inline]
  pub fn cost_of_question(name: &str) -> usize {
    estimated_name_len(name) + QUESTION_FIXED_LEN
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.qd.is_empty() && self.an.is_empty() && self.ns.is_empty()
  }

  #[inline]
  pub fn answer_count(&self) -> usize {
    self.an.len() + self.ns.len()
  }
}

impl Default for OutboundMessage {
  fn default() -> Self {
    Self::new()
  }
}

#[inline]
pub(crate) fn mdns_group(port: u16) -> SocketAddr {
  SocketAddr::new(IpAddr::V4(core::net::Ipv4Addr::new(224, 0, 0, 251)), port)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_len_estimate_counts_labels_and_root() {
    assert_eq!(estimated_name_len("a.b.c"), 1 + 1 + 1 + 1 + 1 + 1 + 1);
    assert_eq!(estimated_name_len(""), 1);
  }

  #[test]
  fn builder_tracks_len() {
    let mut m = OutboundMessage::new();
    assert_eq!(m.encoded_len(), HEADER_LEN);
    m.qd("host.local", RecordType::Any, 1);
    assert!(m.encoded_len() > HEADER_LEN);
  }
}
