use derive_more::Display;

/// The resource record types this engine understands.
///
/// The wire codec is an external collaborator (§1/§6 of the spec): this is
/// a closed, wire-agnostic enum the host's codec maps to and from whatever
/// on-the-wire `TYPE` value it decodes, not the 16-bit IANA registry itself.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
  A,
  Ns,
  Cname,
  Ptr,
  Txt,
  Srv,
  Aaaa,
  /// Matches any record type on a name; valid only in questions/queries,
  /// never as the type of a stored record.
  Any,
  /// An unrecognized wire type, carried through opaquely.
  Other(u16),
}

impl RecordType {
  /// Whether `self` (typically a question's type) matches `other` (typically
  /// a stored record's type): `ANY` matches everything.
  #[inline]
  pub fn matches(self, other: RecordType) -> bool {
    self == RecordType::Any || other == RecordType::Any || self == other
  }

  #[inline]
  pub const fn is_any(self) -> bool {
    matches!(self, RecordType::Any)
  }
}
