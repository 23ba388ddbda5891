#![warn(
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented
)]
#![allow(
    clippy::needless_continue,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod instrumentation;
pub mod net;
pub mod sync;
pub mod task;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use unicase::UniCase;

/// A string that compares and hashes without regard to ASCII case, while
/// preserving the case it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaseInsensitiveString(UniCase<String>);

impl CaseInsensitiveString {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        Self(UniCase::from(s.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_empty()
    }
}

impl AsRef<str> for CaseInsensitiveString {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for CaseInsensitiveString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for CaseInsensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CaseInsensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_ok;

    #[test]
    fn test_case_insensitive_equality() {
        let a = CaseInsensitiveString::new("Kubernetes");
        let b = CaseInsensitiveString::new("kubernetes");
        let c = CaseInsensitiveString::new("KUBERNETES");

        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_preserves_original_case() {
        let s = CaseInsensitiveString::new("Kube-ApiServer");
        assert_eq!(s.to_string(), "Kube-ApiServer");
    }

    #[test]
    fn test_serialization_round_trip() {
        let s = CaseInsensitiveString::new("edge-node-01");
        let serialized = assert_ok!(serde_json::to_string(&s));
        assert_eq!(serialized, "\"edge-node-01\"");

        let deserialized: CaseInsensitiveString = assert_ok!(serde_json::from_str(&serialized));
        assert_eq!(s, deserialized);
    }
}
