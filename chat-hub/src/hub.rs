//! Join/Post/Leave/PollOne on top of the [`Registry`].
//!
//! Fan-out is best effort: every recipient gets at most one enqueue attempt
//! per message, and a full or closed mailbox only produces a log line. The
//! caller of [`Hub::post`] never learns about individual drops.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    mailbox::{DEFAULT_CAPACITY, EnqueueError, Mailbox},
    message::{Message, Notice},
    participant::ParticipantId,
    registry::Registry,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("participant id must not be empty")]
    InvalidParticipant,
    #[error("participant {0} is not joined")]
    UnknownParticipant(ParticipantId),
}

/// Outcome of one fan-out.
///
/// `delivered` counts recipients whose mailbox accepted the text; `dropped`
/// counts those whose mailbox was full or already closed. The sender is never
/// counted, so a hub with a single participant yields the default value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct Hub {
    registry: Registry,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Registry::new(capacity),
        }
    }

    /// Registers `id` and announces it to everyone else.
    ///
    /// Joining with an id that is already registered closes the previous
    /// mailbox (ending its delivery loop) and replaces it.
    pub async fn join(&self, id: ParticipantId) -> Result<Mailbox, HubError> {
        if !id.is_valid() {
            return Err(HubError::InvalidParticipant);
        }

        let (mailbox, replaced) = self.registry.insert(id.clone()).await;
        if let Some(previous) = replaced {
            warn!(participant = %id, "participant joined twice; closing previous mailbox");
            previous.close();
        }

        let participants = self.registry.len().await;
        info!(participant = %id, participants, "participant joined");
        self.broadcast(&id, Notice::Joined(&id).to_string()).await;

        Ok(mailbox)
    }

    pub async fn post(
        &self,
        id: &ParticipantId,
        content: impl Into<String>,
    ) -> Result<(), HubError> {
        // Membership is checked under the same lock that takes the snapshot,
        // so a Post racing its own Leave either fans out in full or not at all.
        let recipients = self
            .registry
            .recipients_of(id)
            .await
            .ok_or_else(|| HubError::UnknownParticipant(id.clone()))?;

        let message = Message::new(id.clone(), content);
        debug!(participant = %id, content = message.content(), "message posted");
        fan_out(message.sender(), recipients, message.to_string());
        Ok(())
    }

    /// Deregisters `id`, closes its mailbox and announces the departure.
    ///
    /// Returns whether `id` was joined; leaving twice is not an error.
    pub async fn leave(&self, id: &ParticipantId) -> bool {
        let removed = self.registry.remove(id).await;
        self.finish_leave(id, removed).await
    }

    /// Leaves only if `id` is still registered with `mailbox`.
    ///
    /// Used on behalf of a connection whose entry may since have been replaced
    /// by a newer Join for the same id; in that case nothing happens.
    pub async fn leave_if_current(&self, id: &ParticipantId, mailbox: &Mailbox) -> bool {
        let removed = self.registry.remove_if_same(id, mailbox).await;
        self.finish_leave(id, removed).await
    }

    async fn finish_leave(&self, id: &ParticipantId, removed: Option<Mailbox>) -> bool {
        let Some(mailbox) = removed else {
            debug!(participant = %id, "leave for participant that is not joined");
            return false;
        };
        mailbox.close();

        let participants = self.registry.len().await;
        info!(participant = %id, participants, "participant left");
        self.broadcast(id, Notice::Left(id).to_string()).await;
        true
    }

    /// Waits for the next text addressed to `id`.
    ///
    /// `Ok(None)` means the mailbox was closed, either by a Leave or by a
    /// replacing Join, and everything pending has been handed out.
    pub async fn poll_one(&self, id: &ParticipantId) -> Result<Option<String>, HubError> {
        let mailbox = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| HubError::UnknownParticipant(id.clone()))?;
        Ok(mailbox.dequeue().await)
    }

    pub async fn is_joined(&self, id: &ParticipantId) -> bool {
        self.registry.contains(id).await
    }

    pub async fn participant_count(&self) -> usize {
        self.registry.len().await
    }

    /// Closes every mailbox so pending polls and delivery loops finish.
    pub async fn shutdown(&self) {
        let entries = self.registry.drain().await;
        info!(participants = entries.len(), "closing all mailboxes");
        for (_, mailbox) in entries {
            mailbox.close();
        }
    }

    pub(crate) async fn broadcast(&self, excluded: &ParticipantId, text: String) -> FanOut {
        let recipients = self.registry.snapshot_excluding(excluded).await;
        fan_out(excluded, recipients, text)
    }
}

fn fan_out(
    sender: &ParticipantId,
    recipients: Vec<(ParticipantId, Mailbox)>,
    text: String,
) -> FanOut {
    let mut outcome = FanOut::default();

    for (recipient, mailbox) in recipients {
        match mailbox.enqueue(text.as_str()) {
            Ok(()) => outcome.delivered += 1,
            Err(EnqueueError::Full(_)) => {
                outcome.dropped += 1;
                warn!(participant = %recipient, "mailbox full; dropping message");
            }
            Err(EnqueueError::Closed(_)) => {
                outcome.dropped += 1;
                debug!(participant = %recipient, "mailbox closed during broadcast");
            }
        }
    }

    debug!(
        %sender,
        delivered = outcome.delivered,
        dropped = outcome.dropped,
        "broadcast complete"
    );
    outcome
}
