//! Redacting wrapper for client secrets and tokens
//!
//! Client secrets arrive from environment variables and secret files, often
//! with a trailing newline. `Secret::non_blank` is the single place that
//! decides whether such input is a secret at all.

use std::fmt;
use zeroize::Zeroize;

/// Value that never shows up in `Debug`/`Display` output and is wiped on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value, e.g. to put it in a request body.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Wrap `value` without surrounding whitespace. Blank input is no secret,
    /// which is how public clients are configured.
    pub fn non_blank(value: &str) -> Option<Self> {
        let value = value.trim();
        (!value.is_empty()).then(|| Self(value.to_owned()))
    }

    /// Whether the value is empty or whitespace only. A blank secret built
    /// with `new` must not be sent to a token endpoint.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
