use core::net::Ipv4Addr;

use smol_str::SmolStr;

use crate::record_type::RecordType;

/// The priority/weight/port triple carried by an SRV record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Srv {
  pub priority: u16,
  pub weight: u16,
  pub port: u16,
}

/// A decoded, type-aware view of a record's `rdata`, alongside the opaque
/// bytes themselves (spec §3: "plus decoded convenience fields").
#[derive(Debug, Clone, Default)]
pub struct Decoded {
  pub ip: Option<Ipv4Addr>,
  pub rdname: Option<SmolStr>,
  pub srv: Option<Srv>,
}

/// A DNS resource record body, independent of whether it lives in the
/// record store (locally published) or the cache (learned from a peer).
#[derive(Debug, Clone)]
pub struct Answer {
  pub name: SmolStr,
  pub rtype: RecordType,
  /// For cache entries this is overwritten with an absolute expiry once
  /// inserted (§4.3); for published records it is the lifetime in seconds
  /// as handed to `AllocShared`/`AllocUnique`.
  pub ttl: u32,
  pub rdata: Vec<u8>,
  pub decoded: Decoded,
}

impl Answer {
  pub fn new(name: impl Into<SmolStr>, rtype: RecordType, ttl: u32, rdata: Vec<u8>) -> Self {
    Self {
      name: name.into(),
      rtype,
      ttl,
      rdata,
      decoded: Decoded::default(),
    }
  }

  pub fn with_ip(mut self, ip: Ipv4Addr) -> Self {
    self.decoded.ip = Some(ip);
    self
  }

  pub fn with_rdname(mut self, rdname: impl Into<SmolStr>) -> Self {
    self.decoded.rdname = Some(rdname.into());
    self
  }

  pub fn with_srv(mut self, srv: Srv, target: impl Into<SmolStr>) -> Self {
    self.decoded.srv = Some(srv);
    self.decoded.rdname = Some(target.into());
    self
  }

  #[inline]
  pub fn rdlen(&self) -> u16 {
    self.rdata.len() as u16
  }
}
