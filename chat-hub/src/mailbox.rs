//! Bounded per-participant inbox.
//!
//! Producers call [`Mailbox::enqueue`], which never waits: a full queue drops
//! the text and reports [`EnqueueError::Full`]. The single consumer awaits
//! [`Mailbox::dequeue`], which drains whatever is pending and then yields
//! `None` once the mailbox has been closed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, mpsc::error::TrySendError};

pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("mailbox is full")]
    Full(String),
    #[error("mailbox is closed")]
    Closed(String),
}

impl EnqueueError {
    /// Hands back the text that could not be queued.
    pub fn into_inner(self) -> String {
        match self {
            EnqueueError::Full(text) | EnqueueError::Closed(text) => text,
        }
    }
}

/// Cheaply cloneable handle; every clone refers to the same queue.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    // `None` once closed. Dropping the only sender is what ends the receiver.
    sender: Mutex<Option<mpsc::Sender<String>>>,
    receiver: AsyncMutex<mpsc::Receiver<String>>,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                capacity,
                sender: Mutex::new(Some(sender)),
                receiver: AsyncMutex::new(receiver),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn enqueue(&self, text: impl Into<String>) -> Result<(), EnqueueError> {
        let text = text.into();
        let sender = self.inner.sender();
        let Some(sender) = sender.as_ref() else {
            return Err(EnqueueError::Closed(text));
        };

        sender.try_send(text).map_err(|err| match err {
            TrySendError::Full(text) => EnqueueError::Full(text),
            TrySendError::Closed(text) => EnqueueError::Closed(text),
        })
    }

    /// Waits for the next pending text.
    ///
    /// Returns `None` only after [`Mailbox::close`] and once the queue is empty.
    pub async fn dequeue(&self) -> Option<String> {
        let mut receiver = self.inner.receiver.lock().await;
        receiver.recv().await
    }

    /// Marks the mailbox terminal. Later enqueues fail with `Closed`; a waiting
    /// `dequeue` wakes up as soon as the backlog is empty.
    pub fn close(&self) {
        self.inner.sender().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sender().is_none()
    }

    /// Number of texts waiting to be dequeued. Always 0 once closed.
    pub fn pending(&self) -> usize {
        match self.inner.sender().as_ref() {
            Some(sender) => self.inner.capacity - sender.capacity(),
            None => 0,
        }
    }

    /// Consumes the handle into a stream that ends when the mailbox closes.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        futures::stream::unfold(self, |mailbox| async move {
            let text = mailbox.dequeue().await?;
            Some((text, mailbox))
        })
    }

    /// Whether both handles refer to the same queue.
    pub fn same_as(&self, other: &Mailbox) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Inner {
    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
