//! Client half of the wire protocol.
//!
//! A [`HubClient`] owns one TCP connection. Calls can be issued concurrently
//! from several tasks; a background reader routes each response to its caller
//! by `seq`.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex as AsyncMutex, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    participant::ParticipantId,
    protocol::{Call, ErrorCode, Reply, Request, Response, read_frame, write_frame},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("connection to the hub was closed")]
    ConnectionClosed,
    #[error("hub rejected the call ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("unexpected reply from the hub: {0:?}")]
    UnexpectedReply(Reply),
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Reply>>>>>;

pub struct HubClient {
    writer: AsyncMutex<OwnedWriteHalf>,
    // `None` once the reader has seen the connection end.
    pending: Pending,
    next_seq: AtomicU64,
    reader_task: JoinHandle<()>,
}

impl HubClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader_task = tokio::spawn(route_responses(
            BufReader::new(reader),
            Arc::clone(&pending),
        ));

        Self {
            writer: AsyncMutex::new(writer),
            pending,
            next_seq: AtomicU64::new(1),
            reader_task,
        }
    }

    pub async fn join(&self, id: &ParticipantId) -> Result<ParticipantId, ClientError> {
        match self.call(Call::Join { id: id.clone() }).await? {
            Reply::Joined { id } => Ok(id),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Posts `text` as `id`; resolves with the hub's acknowledgement status.
    pub async fn post(
        &self,
        id: &ParticipantId,
        text: impl Into<String>,
    ) -> Result<String, ClientError> {
        let call = Call::Post {
            id: id.clone(),
            text: text.into(),
        };
        match self.call(call).await? {
            Reply::Posted { status, .. } => Ok(status),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    pub async fn leave(&self, id: &ParticipantId) -> Result<ParticipantId, ClientError> {
        match self.call(Call::Leave { id: id.clone() }).await? {
            Reply::Left { id } => Ok(id),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Blocks until the hub hands out one text for `id`, or `None` once its
    /// mailbox has been closed.
    pub async fn poll_one(&self, id: &ParticipantId) -> Result<Option<String>, ClientError> {
        match self.call(Call::PollOne { id: id.clone() }).await? {
            Reply::Delivered { text } => Ok(Some(text)),
            Reply::EndOfStream => Ok(None),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Everything delivered to `id`, one `poll_one` at a time. The stream ends
    /// after the mailbox closes or on the first error.
    pub fn inbox(
        self: &Arc<Self>,
        id: ParticipantId,
    ) -> impl Stream<Item = Result<String, ClientError>> + Send + 'static {
        futures::stream::unfold(Some((Arc::clone(self), id)), |state| async move {
            let (client, id) = state?;
            match client.poll_one(&id).await {
                Ok(Some(text)) => Some((Ok(text), Some((client, id)))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    pub async fn call(&self, call: Call) -> Result<Reply, ClientError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(pending) = pending.as_mut() else {
                return Err(ClientError::ConnectionClosed);
            };
            pending.insert(seq, reply_tx);
        }

        let request = Request { seq, call };
        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = write_frame(&mut *writer, &request).await {
                self.forget(seq);
                return Err(err.into());
            }
        }

        match reply_rx.await {
            Ok(Reply::Error { code, message }) => Err(ClientError::Rejected { code, message }),
            Ok(reply) => Ok(reply),
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    pub async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }

    fn forget(&self, seq: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = pending.as_mut() {
            pending.remove(&seq);
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn route_responses(mut reader: BufReader<OwnedReadHalf>, pending: Pending) {
    loop {
        match read_frame::<_, Response>(&mut reader).await {
            Ok(Some(Response { seq, reply })) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_mut()
                    .and_then(|pending| pending.remove(&seq));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(reply);
                    }
                    None => debug!(seq, "response for unknown request"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = ?err, "failed to read from hub");
                break;
            }
        }
    }

    // Dropping the waiters wakes every caller with `ConnectionClosed`.
    pending.lock().unwrap_or_else(PoisonError::into_inner).take();
}

/// Writes each delivered text as its own line until the inbox ends.
pub async fn deliver<S, W>(inbox: S, sink: &mut W) -> Result<(), ClientError>
where
    S: Stream<Item = Result<String, ClientError>>,
    W: AsyncWrite + Unpin,
{
    futures::pin_mut!(inbox);
    while let Some(text) = inbox.next().await {
        let mut line = text?;
        line.push('\n');
        sink.write_all(line.as_bytes()).await?;
        sink.flush().await?;
    }
    Ok(())
}
