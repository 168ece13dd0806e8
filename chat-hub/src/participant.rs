use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

const GENERATED_PREFIX: &str = "User_";
const GENERATED_LEN: usize = 8;

/// Opaque token naming one joined participant.
///
/// The hub never invents identifiers; callers bring their own and the hub only
/// rejects the structurally invalid (empty) ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identifier of the form `User_xxxxxxxx`.
    pub fn generate() -> Self {
        Self(format!(
            "{GENERATED_PREFIX}{}",
            nanoid::nanoid!(GENERATED_LEN)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ParticipantId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let first = ParticipantId::generate();
        let second = ParticipantId::generate();

        assert!(first.as_str().starts_with("User_"));
        assert_eq!(first.as_str().len(), GENERATED_PREFIX.len() + GENERATED_LEN);
        assert_ne!(first, second);
    }

    #[test]
    fn blank_ids_are_invalid() {
        assert!(!ParticipantId::new("").is_valid());
        assert!(!ParticipantId::new("   ").is_valid());
        assert!(ParticipantId::new("alice").is_valid());
    }

    #[test]
    fn serializes_as_plain_string() {
        let encoded = serde_json::to_string(&ParticipantId::new("bob")).expect("encode");
        assert_eq!(encoded, "\"bob\"");
    }
}
