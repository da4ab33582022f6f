//! Redacting wrapper for credential material
//!
//! Access and refresh tokens travel through structs that derive `Debug` and
//! end up in tracing fields. Wrapping them in `Secret` keeps the raw value out
//! of every formatted representation while still letting serde persist it.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs, zeroed on drop
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Borrow the secret as a string slice.
    pub fn expose_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
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

impl<T: Zeroize + Eq> Eq for Secret<T> {}

// Serializes the raw value: the credential file and request bodies carry it
impl<T: Zeroize + Serialize> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Zeroize + Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        T::deserialize(deserializer).map(Secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("eyJhbGciOi.access"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret: Secret<String> = "rt_123".into();
        assert_eq!(secret.expose_str(), "rt_123");
    }

    #[test]
    fn test_secret_redacted_inside_derived_debug() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Pair {
            access: Secret<String>,
        }
        let pair = Pair {
            access: "A1".into(),
        };
        let debug = format!("{pair:?}");
        assert!(!debug.contains("A1"), "token leaked into Debug: {debug}");
    }

    #[test]
    fn test_secret_serde_is_transparent() {
        let secret: Secret<String> = "A2".into();
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"A2\"");
        let parsed: Secret<String> = serde_json::from_str("\"R2\"").unwrap();
        assert_eq!(parsed.expose_str(), "R2");
    }

    #[test]
    fn test_secret_equality_compares_inner() {
        let a: Secret<String> = "A1".into();
        let b: Secret<String> = "A1".into();
        let c: Secret<String> = "A2".into();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
