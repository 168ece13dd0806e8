use std::fmt;

use crate::participant::ParticipantId;

/// A posted chat line together with its author.
///
/// Only lives between a Post and the fan-out that renders it into each
/// recipient's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: ParticipantId,
    content: String,
}

impl Message {
    pub fn new(sender: ParticipantId, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
        }
    }

    pub fn sender(&self) -> &ParticipantId {
        &self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.sender, self.content)
    }
}

/// Lifecycle announcements broadcast by the hub itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice<'a> {
    Joined(&'a ParticipantId),
    Left(&'a ParticipantId),
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Joined(id) => write!(f, "User {id} joined"),
            Notice::Left(id) => write!(f, "User {id} left"),
        }
    }
}
