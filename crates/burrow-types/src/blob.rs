//! Cell payloads.
//!
//! A [`Blob`] is a byte sequence with a form tag describing how the bytes
//! should be read. Equality is structural; ordering inside a sorted table is
//! defined by the comparator active for that sort, not by the blob itself.
//! [`default_cmp`] gives the engine's default bytewise ordering.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Charset/form tag carried alongside blob bytes.
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
pub enum BlobForm {
    /// US-ASCII text.
    #[default]
    Ascii,
    /// UTF-8 text.
    Utf8,
    /// Opaque bytes.
    Binary,
}

/// The value stored in a cell: bytes plus a form tag.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct Blob {
    bytes: Vec<u8>,
    form: BlobForm,
}

impl Blob {
    #[must_use]
    pub fn new(bytes: Vec<u8>, form: BlobForm) -> Self {
        Self { bytes, form }
    }

    /// Text blob; tagged `Ascii` when the content allows it, `Utf8` otherwise.
    #[must_use]
    pub fn text(s: &str) -> Self {
        let form = if s.is_ascii() {
            BlobForm::Ascii
        } else {
            BlobForm::Utf8
        };
        Self {
            bytes: s.as_bytes().to_vec(),
            form,
        }
    }

    /// Opaque binary blob.
    #[must_use]
    pub fn binary(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            form: BlobForm::Binary,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    #[must_use]
    pub const fn form(&self) -> BlobForm {
        self.form
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// View the bytes as text, if the form says they are and they validate.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self.form {
            BlobForm::Ascii | BlobForm::Utf8 => std::str::from_utf8(&self.bytes).ok(),
            BlobForm::Binary => None,
        }
    }

    /// A blob holding only the first `len` bytes of this one.
    ///
    /// Used for prefix searches: comparing `self.truncated(p.len())` against
    /// `p` under the active comparator decides whether `p` is a prefix.
    #[must_use]
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            bytes: self.bytes[..self.bytes.len().min(len)].to_vec(),
            form: self.form,
        }
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(s) => write!(f, "{s:?}"),
            None => write!(f, "<{} bytes>", self.bytes.len()),
        }
    }
}

/// An injectable blob ordering.
///
/// Comparators must be pure; the engine may call them any number of times in
/// any order while sorting or searching.
pub type BlobCmp = Arc<dyn Fn(&Blob, &Blob) -> Ordering + Send + Sync>;

/// The engine's default ordering: bytewise on content, ignoring the form tag.
///
/// Rows that compare equal under the active comparator fall back to Oid
/// order inside a sorted table, so content ties are still deterministic.
#[must_use]
pub fn default_cmp() -> BlobCmp {
    Arc::new(|a: &Blob, b: &Blob| a.as_bytes().cmp(b.as_bytes()))
}

/// Whether `prefix` is a prefix of `value` under `cmp`.
#[must_use]
pub fn prefix_matches(cmp: &BlobCmp, value: &Blob, prefix: &Blob) -> bool {
    cmp(&value.truncated(prefix.len()), prefix) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_detection() {
        assert_eq!(Blob::text("plain").form(), BlobForm::Ascii);
        assert_eq!(Blob::text("naïve").form(), BlobForm::Utf8);
        assert_eq!(Blob::binary(vec![0xff]).form(), BlobForm::Binary);
    }

    #[test]
    fn as_text_respects_form() {
        assert_eq!(Blob::text("ab").as_text(), Some("ab"));
        assert_eq!(Blob::binary(b"ab".to_vec()).as_text(), None);
    }

    #[test]
    fn truncated_clamps() {
        let b = Blob::text("abc");
        assert_eq!(b.truncated(2).as_bytes(), b"ab");
        assert_eq!(b.truncated(10).as_bytes(), b"abc");
    }

    #[test]
    fn default_cmp_is_bytewise() {
        let cmp = default_cmp();
        assert_eq!(cmp(&Blob::text("ab"), &Blob::text("ac")), Ordering::Less);
        assert_eq!(cmp(&Blob::text("b"), &Blob::text("ab")), Ordering::Greater);
        assert_eq!(cmp(&Blob::text("x"), &Blob::text("x")), Ordering::Equal);
    }

    #[test]
    fn prefix_matching() {
        let cmp = default_cmp();
        assert!(prefix_matches(&cmp, &Blob::text("abc"), &Blob::text("ab")));
        assert!(prefix_matches(&cmp, &Blob::text("ab"), &Blob::text("ab")));
        assert!(!prefix_matches(&cmp, &Blob::text("a"), &Blob::text("ab")));
        assert!(!prefix_matches(&cmp, &Blob::text("ba"), &Blob::text("ab")));
    }
}
