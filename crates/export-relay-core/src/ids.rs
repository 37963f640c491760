//! Identifiers shared by every relay component.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote entity an export runs against (usually a device id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Create a target from any string-like id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A session or client waiting on export outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(String);

impl ObserverId {
    /// Create an observer id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObserverId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ObserverId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One start-to-terminal cycle of the action for a target.
///
/// Unique for the lifetime of a coordinator; used to reject late
/// reports that belong to an episode that was already settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub u64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_ids_are_empty() {
        assert!(Target::new("  ").is_empty());
        assert!(ObserverId::new("").is_empty());
        assert!(!Target::from("node//abc").is_empty());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&Target::new("d1")).unwrap();
        assert_eq!(json, "\"d1\"");

        let observer: ObserverId = serde_json::from_str("\"s-42\"").unwrap();
        assert_eq!(observer.as_str(), "s-42");
    }
}
