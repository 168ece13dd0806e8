use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::mailbox::DEFAULT_CAPACITY;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast hub, serving participants over TCP.
    Server(ServerArgs),
    /// Join a running hub and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:1234")]
    pub listen: SocketAddr,

    /// Messages buffered per participant before new ones are dropped.
    #[arg(long, default_value_t = DEFAULT_CAPACITY, value_parser = parse_capacity)]
    pub mailbox_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the hub to connect to.
    #[arg(long, default_value = "127.0.0.1:1234")]
    pub server: SocketAddr,

    /// Participant id to join with. A random `User_` id is used when omitted.
    #[arg(long)]
    pub id: Option<String>,
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("capacity must be at least 1".to_string()),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(err.to_string()),
    }
}
