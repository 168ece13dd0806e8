use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    client::{self, HubClient},
    participant::ParticipantId,
    protocol::ErrorCode,
};

const EXIT_COMMAND: &str = "exit";

pub async fn run(args: ClientArgs) -> Result<()> {
    let client = HubClient::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let id = args.id.map(ParticipantId::new).unwrap_or_else(ParticipantId::generate);
    let mut stdin = BufReader::new(tokio::io::stdin());
    run_session(Arc::new(client), id, &mut stdin).await
}

/// Joins as `id`, prints deliveries while reading lines from `input`, and
/// leaves when the user types `exit`, input ends, or ctrl-c arrives.
pub async fn run_session<R>(client: Arc<HubClient>, id: ParticipantId, input: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let id = client.join(&id).await.context("failed to join the hub")?;
    write_stdout(&format!("*** joined as {id}")).await?;

    let delivery = tokio::spawn({
        let inbox = client.inbox(id.clone());
        async move { client::deliver(inbox, &mut tokio::io::stdout()).await }
    });

    read_input(&client, &id, input).await?;

    if let Err(err) = client.leave(&id).await {
        warn!(error = %err, "failed to leave cleanly");
    }
    write_stdout("*** goodbye").await?;

    match delivery.await {
        Ok(Ok(())) => {}
        // A poll issued after our own Leave finds nobody registered.
        Ok(Err(err)) if err.code() == Some(ErrorCode::UnknownParticipant) => {}
        Ok(Err(err)) => warn!(error = %err, "delivery loop ended with error"),
        Err(err) => warn!(error = ?err, "delivery task failed"),
    }

    if let Err(err) = client.shutdown().await {
        warn!(?err, "failed to shutdown connection cleanly");
    }
    Ok(())
}

async fn read_input<R>(client: &HubClient, id: &ParticipantId, input: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        select! {
            bytes_read = input.read_line(&mut line) => {
                if bytes_read? == 0 {
                    return Ok(());
                }
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if text.eq_ignore_ascii_case(EXIT_COMMAND) {
                    return Ok(());
                }
                if let Err(err) = client.post(id, text).await {
                    warn!(error = %err, "failed to send message");
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(err) = ctrl_c {
                    warn!(?err, "ctrl-c handler failed");
                }
                return Ok(());
            }
        }
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{line}\n").as_bytes()).await?;
    stdout.flush().await
}
