//! Token namespace: per-store bidirectional mapping between ASCII names and
//! small integer tokens.
//!
//! This subsystem never fails hard: `query` and `resolve` answer `None` for
//! anything unknown, and `intern` always hands back a token. The store-level
//! wrapper warns on the `Env` when a non-ASCII name is interned.

use std::collections::HashMap;

use burrow_types::Token;

/// Bidirectional name/token table.
///
/// Tokens are allocated densely starting at 1, so the reverse direction is a
/// plain vector indexed by `token - 1`.
#[derive(Debug, Default)]
pub struct AtomTable {
    by_name: HashMap<String, Token>,
    by_token: Vec<String>,
}

impl AtomTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Look up `name` without allocating.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<Token> {
        self.by_name.get(name).copied()
    }

    /// Look up `name`, allocating the next unused token if absent.
    pub fn intern(&mut self, name: &str) -> Token {
        if let Some(token) = self.by_name.get(name) {
            return *token;
        }
        let raw = u32::try_from(self.by_token.len() + 1).unwrap_or(u32::MAX);
        // Dense allocation cannot produce 0.
        let token = Token::new(raw).unwrap_or(Token::MIN);
        self.by_token.push(name.to_owned());
        self.by_name.insert(name.to_owned(), token);
        token
    }

    /// Reverse lookup.
    #[must_use]
    pub fn resolve(&self, token: Token) -> Option<&str> {
        self.by_token
            .get((token.get() - 1) as usize)
            .map(String::as_str)
    }

    /// Flatten to (raw token, name) pairs for the snapshot image.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(u32, String)> {
        self.by_token
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u32 + 1, name.clone()))
            .collect()
    }

    /// Rebuild from snapshot pairs. Pairs must be dense and 1-based; gaps
    /// mean the image was not written by this engine.
    #[must_use]
    pub fn from_pairs(mut pairs: Vec<(u32, String)>) -> Option<Self> {
        pairs.sort_by_key(|(raw, _)| *raw);
        let mut table = Self::new();
        for (i, (raw, name)) in pairs.into_iter().enumerate() {
            if raw as usize != i + 1 {
                return None;
            }
            table.intern(&name);
        }
        Some(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern("cards");
        let b = atoms.intern("cards");
        assert_eq!(a, b);
        assert_eq!(atoms.len(), 1);
    }

    #[test]
    fn query_never_allocates() {
        let mut atoms = AtomTable::new();
        assert_eq!(atoms.query("missing"), None);
        assert_eq!(atoms.len(), 0);
        let t = atoms.intern("present");
        assert_eq!(atoms.query("present"), Some(t));
    }

    #[test]
    fn tokens_are_dense_from_one() {
        let mut atoms = AtomTable::new();
        assert_eq!(atoms.intern("a").get(), 1);
        assert_eq!(atoms.intern("b").get(), 2);
        assert_eq!(atoms.intern("c").get(), 3);
    }

    #[test]
    fn resolve_round_trips() {
        let mut atoms = AtomTable::new();
        let t = atoms.intern("addr");
        assert_eq!(atoms.resolve(t), Some("addr"));
        assert_eq!(atoms.resolve(Token::new(99).unwrap()), None);
    }

    #[test]
    fn pairs_round_trip() {
        let mut atoms = AtomTable::new();
        atoms.intern("x");
        atoms.intern("y");
        let pairs = atoms.to_pairs();
        let back = AtomTable::from_pairs(pairs).unwrap();
        assert_eq!(back.query("x"), atoms.query("x"));
        assert_eq!(back.query("y"), atoms.query("y"));
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn from_pairs_rejects_gaps() {
        assert!(AtomTable::from_pairs(vec![(1, "a".into()), (3, "c".into())]).is_none());
    }
}
