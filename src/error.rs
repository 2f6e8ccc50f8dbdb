//! Engine-level errors (§7, §9b). Only setup/allocation calls return these;
//! the `input`/`output` hot path never does (§7 Policy).

/// Which arena was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ArenaKind {
  #[display("published records")]
  Records,
  #[display("cache entries")]
  Cache,
  #[display("queries")]
  Queries,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The backing arena for this entity kind cannot accept another entry.
  /// Existing state is unaffected; the caller's new allocation simply did
  /// not happen.
  #[error("{kind} arena is exhausted")]
  Exhausted { kind: ArenaKind },
  /// A name exceeded the engine's configured maximum length.
  #[error("name {0:?} is too long")]
  NameTooLong(String),
  /// A name used where a fully qualified domain name is required has no
  /// domain part (empty, or a bare undotted label).
  #[error("{0:?} is not a fully qualified domain name")]
  NotFqdn(String),
}
