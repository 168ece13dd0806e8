use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::mpsc,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ServerArgs,
    hub::{Hub, HubError},
    mailbox::Mailbox,
    participant::ParticipantId,
    protocol::{Call, ErrorCode, POST_ACK, Reply, Request, Response, read_frame, write_frame},
};

// Responses queued per connection before request handling waits on the writer.
const OUTBOUND_BUFFER: usize = 64;

/// TCP front end for a [`Hub`]. One task per connection.
pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl Server {
    pub fn new(listener: TcpListener, hub: Hub) -> Self {
        Self {
            listener,
            hub: Arc::new(hub),
        }
    }

    /// Listens on `addr`; port 0 picks a free port, see [`Server::local_addr`].
    pub async fn bind(addr: SocketAddr, hub: Hub) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, hub))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, hub } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    hub.shutdown().await;
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => spawn_connection(stream, peer, &hub),
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Serves a fresh hub on `args.listen` until ctrl-c.
///
/// The first line logged names the bound address, which is how callers that
/// pass port 0 learn the real one.
pub async fn run(args: ServerArgs) -> Result<()> {
    let server = Server::bind(args.listen, Hub::with_capacity(args.mailbox_capacity)).await?;
    let addr = server.local_addr()?;
    info!("accepting participants on {addr}");
    debug!(mailbox_capacity = args.mailbox_capacity, "hub configured");

    server.run_until_ctrl_c().await.inspect_err(|err| {
        warn!(error = ?err, "server exited with error");
    })
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, hub: &Arc<Hub>) {
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        debug!(%peer, "connection accepted");
        if let Err(err) = handle_connection(stream, hub).await {
            warn!(%peer, error = ?err, "connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, hub: Arc<Hub>) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(write_responses(writer, outbound_rx));

    let mut session = Session {
        hub,
        outbound,
        joined: None,
        polls: JoinSet::new(),
    };

    let result = session.serve(&mut reader).await;
    session.close().await;

    // Every sender is gone once the session is closed, which ends the writer.
    if let Err(err) = writer_task.await {
        warn!(error = ?err, "response writer task failed");
    }

    result
}

async fn write_responses(mut writer: OwnedWriteHalf, mut responses: mpsc::Receiver<Response>) {
    while let Some(response) = responses.recv().await {
        if let Err(err) = write_frame(&mut writer, &response).await {
            debug!(?err, "failed to write response; dropping connection output");
            break;
        }
    }
}

/// Per-connection state: the participant this connection joined as plus the
/// polls still waiting on its mailbox.
struct Session {
    hub: Arc<Hub>,
    outbound: mpsc::Sender<Response>,
    joined: Option<Membership>,
    polls: JoinSet<()>,
}

/// The id a connection joined under. The mailbox is dropped on Leave but the
/// id is kept, so later calls for it fail as unknown rather than foreign.
struct Membership {
    id: ParticipantId,
    mailbox: Option<Mailbox>,
}

impl Session {
    async fn serve<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        while let Some(request) = read_frame::<_, Request>(reader).await? {
            while self.polls.try_join_next().is_some() {}
            self.dispatch(request).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, Request { seq, call }: Request) -> Result<()> {
        let reply = match call {
            Call::Join { id } => self.join(id).await,
            Call::Post { id, text } => self.post(id, text).await,
            Call::Leave { id } => self.leave(id).await,
            Call::PollOne { id } => match self.owned(&id) {
                Ok(Some(mailbox)) => {
                    self.spawn_poll(seq, id, mailbox);
                    return Ok(());
                }
                Ok(None) => HubError::UnknownParticipant(id).into(),
                Err(rejected) => rejected,
            },
        };

        self.respond(Response { seq, reply }).await
    }

    async fn join(&mut self, id: ParticipantId) -> Reply {
        if let Some(Membership { id: current, mailbox: Some(_) }) = &self.joined {
            return Reply::error(
                ErrorCode::AlreadyJoined,
                format!("connection already joined as {current}"),
            );
        }

        match self.hub.join(id.clone()).await {
            Ok(mailbox) => {
                self.joined = Some(Membership {
                    id: id.clone(),
                    mailbox: Some(mailbox),
                });
                Reply::Joined { id }
            }
            Err(err) => err.into(),
        }
    }

    async fn post(&self, id: ParticipantId, text: String) -> Reply {
        match self.owned(&id) {
            // A closed mailbox means a newer Join for the same id replaced
            // this connection, or the hub shut down.
            Ok(Some(mailbox)) if !mailbox.is_closed() => match self.hub.post(&id, text).await {
                Ok(()) => Reply::Posted {
                    id,
                    status: POST_ACK.to_string(),
                },
                Err(err) => err.into(),
            },
            Ok(_) => HubError::UnknownParticipant(id).into(),
            Err(rejected) => rejected,
        }
    }

    async fn leave(&mut self, id: ParticipantId) -> Reply {
        match self.owned(&id) {
            Ok(Some(mailbox)) => {
                self.hub.leave_if_current(&id, &mailbox).await;
                if let Some(membership) = self.joined.as_mut() {
                    membership.mailbox = None;
                }
                Reply::Left { id }
            }
            Ok(None) => Reply::Left { id },
            Err(rejected) => rejected,
        }
    }

    /// The mailbox behind `id` if this connection joined as `id`; `Ok(None)`
    /// once it has left.
    fn owned(&self, id: &ParticipantId) -> Result<Option<Mailbox>, Reply> {
        match &self.joined {
            Some(membership) if membership.id == *id => Ok(membership.mailbox.clone()),
            _ => Err(Reply::error(
                ErrorCode::NotJoinedHere,
                format!("connection is not joined as {id}"),
            )),
        }
    }

    fn spawn_poll(&mut self, seq: u64, id: ParticipantId, mailbox: Mailbox) {
        let outbound = self.outbound.clone();
        self.polls.spawn(async move {
            let reply = Reply::from(mailbox.dequeue().await);
            if outbound.send(Response { seq, reply }).await.is_err() {
                debug!(participant = %id, "connection gone before poll reply");
            }
        });
    }

    async fn respond(&self, response: Response) -> Result<()> {
        self.outbound
            .send(response)
            .await
            .map_err(|_| anyhow::anyhow!("response writer closed"))
    }

    /// Leaves on behalf of a client that disconnected without saying so.
    ///
    /// Only the entry this connection registered is removed; if a newer Join
    /// has taken over the id, that participant stays.
    async fn close(mut self) {
        if let Some(Membership { id, mailbox: Some(mailbox) }) = self.joined.take() {
            if self.hub.leave_if_current(&id, &mailbox).await {
                info!(participant = %id, "participant disconnected without leaving");
            }
        }
        self.polls.shutdown().await;
    }
}
