use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::{mailbox::Mailbox, participant::ParticipantId};

/// Directory of joined participants and their mailboxes.
///
/// Every operation takes the same lock, so a snapshot never observes a half
/// applied insert or remove. The lock is only held for map bookkeeping; callers
/// enqueue into the snapshot after it has been released.
pub struct Registry {
    entries: Mutex<HashMap<ParticipantId, Mailbox>>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Registers a fresh mailbox for `id`.
    ///
    /// Returns the new mailbox together with whatever entry it displaced, so the
    /// caller can decide what happens to the old one.
    pub async fn insert(&self, id: ParticipantId) -> (Mailbox, Option<Mailbox>) {
        let mailbox = Mailbox::new(self.capacity);
        let mut entries = self.entries.lock().await;
        let replaced = entries.insert(id, mailbox.clone());
        (mailbox, replaced)
    }

    pub async fn remove(&self, id: &ParticipantId) -> Option<Mailbox> {
        let mut entries = self.entries.lock().await;
        entries.remove(id)
    }

    /// Removes `id` only while it still maps to `mailbox`.
    ///
    /// A connection that joined earlier and was replaced by a later Join for
    /// the same id must not tear down the newer entry.
    pub async fn remove_if_same(
        &self,
        id: &ParticipantId,
        mailbox: &Mailbox,
    ) -> Option<Mailbox> {
        let mut entries = self.entries.lock().await;
        match entries.get(id) {
            Some(current) if current.same_as(mailbox) => entries.remove(id),
            _ => None,
        }
    }

    pub async fn get(&self, id: &ParticipantId) -> Option<Mailbox> {
        let entries = self.entries.lock().await;
        entries.get(id).cloned()
    }

    pub async fn contains(&self, id: &ParticipantId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Point-in-time copy of every entry except `excluded`.
    pub async fn snapshot_excluding(
        &self,
        excluded: &ParticipantId,
    ) -> Vec<(ParticipantId, Mailbox)> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|(id, _)| *id != excluded)
            .map(|(id, mailbox)| (id.clone(), mailbox.clone()))
            .collect()
    }

    /// Like [`Registry::snapshot_excluding`], but `None` unless `sender` is
    /// registered at the moment the snapshot is taken.
    pub async fn recipients_of(
        &self,
        sender: &ParticipantId,
    ) -> Option<Vec<(ParticipantId, Mailbox)>> {
        let entries = self.entries.lock().await;
        if !entries.contains_key(sender) {
            return None;
        }
        Some(
            entries
                .iter()
                .filter(|(id, _)| *id != sender)
                .map(|(id, mailbox)| (id.clone(), mailbox.clone()))
                .collect(),
        )
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Removes every entry at once.
    pub async fn drain(&self) -> Vec<(ParticipantId, Mailbox)> {
        let mut entries = self.entries.lock().await;
        entries.drain().collect()
    }
}
