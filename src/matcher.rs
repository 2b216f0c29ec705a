//! Prefix matching against onion address bodies

use crate::onion::{OnionAddress, ADDRESS_LEN};

/// A normalized (lowercase) prefix that an address body must start with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTarget {
    prefix: String,
}

impl SearchTarget {
    /// Create a target, lower-casing the prefix.
    ///
    /// No validation is done here; a prefix outside the base32 alphabet is
    /// simply unsatisfiable. Use [`SearchTarget::validate`] to reject it.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().to_lowercase(),
        }
    }

    /// The normalized prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the first character that can never appear in an address, if any
    pub fn invalid_char(&self) -> Option<char> {
        self.prefix.chars().find(|&c| !is_base32_char(c))
    }

    /// Whether any address can ever satisfy this target
    pub fn is_satisfiable(&self) -> bool {
        self.prefix.len() <= ADDRESS_LEN && self.invalid_char().is_none()
    }

    /// Returns the expected number of attempts to find a match (32^n).
    pub fn estimated_attempts(&self) -> u64 {
        32u64.saturating_pow(self.prefix.len() as u32)
    }

    /// Matches an address against this target.
    #[inline]
    pub fn matches(&self, address: &OnionAddress) -> bool {
        matches(address, self)
    }
}

/// True iff the address body starts with the target prefix.
///
/// Both sides are lowercase by construction, so this is a plain byte compare.
#[inline]
pub fn matches(address: &OnionAddress, target: &SearchTarget) -> bool {
    address.as_str().starts_with(target.prefix())
}

#[inline]
fn is_base32_char(c: char) -> bool {
    c.is_ascii_lowercase() || ('2'..='7').contains(&c)
}
