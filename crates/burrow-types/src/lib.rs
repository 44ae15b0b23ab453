//! Core vocabulary types for the burrow row/table store.
//!
//! Everything here is a plain value type: identities ([`Token`], [`Oid`]),
//! version counters ([`Seed`]), cell payloads ([`Blob`]), and the per-call
//! context ([`Env`]). The engine itself lives in `burrow-core`.

pub mod blob;
pub mod env;

pub use blob::{Blob, BlobCmp, BlobForm, default_cmp, prefix_matches};
pub use env::{Env, Severity};

use std::fmt;
use std::num::NonZeroU32;

/// An atomized name: scope, table kind, or column identifier.
///
/// Tokens are small positive integers handed out by a store's token
/// namespace. Token 0 is reserved and cannot be constructed; wildcard query
/// parameters are expressed as `Option<Token>` with `None` meaning
/// "match any".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct Token(NonZeroU32);

impl Token {
    /// The first token a fresh namespace allocates.
    pub const MIN: Self = Self(NonZeroU32::MIN);

    /// Create a token from a raw u32.
    ///
    /// Returns `None` for 0 (the reserved sentinel).
    #[inline]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// The token after this one, or `None` on u32 wraparound.
    #[inline]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl TryFrom<u32> for Token {
    type Error = InvalidToken;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(InvalidToken)
    }
}

/// Error returned when attempting to create a `Token` from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidToken;

impl fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("token 0 is reserved")
    }
}

impl std::error::Error for InvalidToken {}

/// Identity of a row or table inside one store: a (scope, id) pair.
///
/// Row oids and table oids live in the same 32-bit id space per scope; the
/// store's `has_row`/`has_table` disambiguate which kind an oid names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Oid {
    /// Namespace the id lives in (a row scope).
    pub scope: Token,
    /// Id within the scope.
    pub id: u32,
}

impl Oid {
    #[inline]
    #[must_use]
    pub const fn new(scope: Token, id: u32) -> Self {
        Self { scope, id }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.id)
    }
}

/// Monotonic version counter on a collection.
///
/// A seed changes when membership changes or when order changes, and only
/// then. Cell-value overwrites that leave membership and order alone must not
/// move the seed; cursor staleness detection depends on that asymmetry.
/// 64 bits wide so practical wraparound never occurs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Seed(u64);

impl Seed {
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Advance the counter by one.
    #[inline]
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
