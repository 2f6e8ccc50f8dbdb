//! The "Name key" (spec §3): names are stored as plain `SmolStr` and
//! compared/hashed case-insensitively via [`elf_hash_fold`], the classic
//! ELF hash run over lowercased bytes — the same hash the bucket tables in
//! [`crate::arena`] key on.

use crate::error::EngineError;

/// The longest name `alloc_shared`/`alloc_unique`/`query` accept (§9b),
/// matching the 255-byte ceiling DNS names are bound to on the wire.
pub const MAX_NAME_LEN: usize = 255;

/// Validates a caller-supplied name (§9b malformed-argument cases): it must
/// fit within [`MAX_NAME_LEN`] and be qualified into a domain rather than a
/// bare, undotted label. mDNS names conventionally omit the trailing root
/// dot (`host.local`, not `host.local.`), so "fully qualified" here means
/// "has a domain part", not "ends in a dot".
pub(crate) fn validate(name: &str) -> Result<(), EngineError> {
  if name.len() > MAX_NAME_LEN {
    return Err(EngineError::NameTooLong(name.to_string()));
  }
  if name.is_empty() || !name.contains('.') {
    return Err(EngineError::NotFqdn(name.to_string()));
  }
  Ok(())
}

/// `elfhash` over the lowercased bytes of `s` (names are case-folded before
/// hashing so two names differing only in case land in the same bucket and
/// compare equal).
pub(crate) fn elf_hash_fold(s: &[u8]) -> u32 {
  let mut h: u32 = 0;
  for &b in s {
    let lower = b.to_ascii_lowercase();
    h = (h << 4).wrapping_add(lower as u32);
    let g = h & 0xf000_0000;
    if g != 0 {
      h ^= g >> 24;
    }
    h &= !g;
  }
  h
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_is_stable() {
    assert_eq!(elf_hash_fold(b"abc"), elf_hash_fold(b"abc"));
  }

  #[test]
  fn hash_folds_case() {
    assert_eq!(elf_hash_fold(b"ABC"), elf_hash_fold(b"abc"));
  }

  #[test]
  fn distinct_names_usually_hash_differently() {
    assert_ne!(elf_hash_fold(b"alpha.local"), elf_hash_fold(b"bravo.local"));
  }

  #[test]
  fn validate_accepts_bare_dotted_names() {
    assert!(validate("host.local").is_ok());
    assert!(validate("_http._tcp.local").is_ok());
  }

  #[test]
  fn validate_rejects_undotted_labels() {
    assert!(matches!(validate("host"), Err(EngineError::NotFqdn(_))));
    assert!(matches!(validate(""), Err(EngineError::NotFqdn(_))));
  }

  #[test]
  fn validate_rejects_overlong_names() {
    let long = format!("{}.local", "a".repeat(MAX_NAME_LEN));
    assert!(matches!(validate(&long), Err(EngineError::NameTooLong(_))));
  }
}
