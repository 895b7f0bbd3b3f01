// src/hash.rs

//! Canonical SHA-256 hashing
//!
//! Repository identities and request cache keys are SHA-256 digests over a
//! canonical, version-locked byte encoding. The encoding is:
//!
//! ```text
//! <preamble>\n
//! <field>=<len>:<value>\n            scalar field
//! <field>#<count>\n                  list header, followed by
//! <field>=<len>:<value>\n            one entry per element
//! ```
//!
//! `<len>` is the byte length of `<value>`, which keeps the encoding
//! unambiguous for values containing `=`, `:` or newlines. Tri-state booleans
//! encode as `unset`, `true` or `false`.
//!
//! Changing the preamble, a field name or the field order changes every
//! digest and breaks repository identity across processes.

use sha2::{Digest, Sha256};

/// Incremental canonical encoder feeding a SHA-256 state
pub struct CanonicalHasher {
    state: Sha256,
}

impl CanonicalHasher {
    /// Start a new digest with the given preamble
    pub fn new(preamble: &str) -> Self {
        let mut state = Sha256::new();
        state.update(preamble.as_bytes());
        state.update(b"\n");
        Self { state }
    }

    fn entry(&mut self, field: &str, value: &[u8]) {
        self.state.update(field.as_bytes());
        self.state.update(format!("={}:", value.len()).as_bytes());
        self.state.update(value);
        self.state.update(b"\n");
    }

    /// Add a string field
    pub fn str(&mut self, field: &str, value: &str) -> &mut Self {
        self.entry(field, value.as_bytes());
        self
    }

    /// Add a list field; the element count is part of the encoding
    pub fn list<S: AsRef<str>>(&mut self, field: &str, values: &[S]) -> &mut Self {
        self.state
            .update(format!("{}#{}\n", field, values.len()).as_bytes());
        for value in values {
            self.entry(field, value.as_ref().as_bytes());
        }
        self
    }

    /// Add a plain boolean field
    pub fn bool(&mut self, field: &str, value: bool) -> &mut Self {
        self.entry(field, if value { b"true" } else { b"false" });
        self
    }

    /// Add a tri-state boolean; unset is distinct from false
    pub fn tristate(&mut self, field: &str, value: Option<bool>) -> &mut Self {
        let encoded: &[u8] = match value {
            None => b"unset",
            Some(true) => b"true",
            Some(false) => b"false",
        };
        self.entry(field, encoded);
        self
    }

    /// Finish and return the 64-char lowercase hex digest
    pub fn finish(self) -> String {
        hex::encode(self.state.finalize())
    }
}

/// SHA-256 of a byte slice as lowercase hex
#[inline]
pub fn sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
