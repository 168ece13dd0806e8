//! Real-time broadcast hub for a small chat room.
//!
//! Every participant owns a bounded mailbox; a post is fanned out to every
//! mailbox except the author's. Modules, leaf first:
//!
//! - [`participant`] and [`message`] define identifiers and the rendered texts.
//! - [`mailbox`] is the bounded queue with non-blocking enqueue.
//! - [`registry`] maps participant ids to mailboxes under a single lock.
//! - [`hub`] implements Join, Post, Leave and PollOne plus the lossy fan-out.
//! - [`protocol`] is the JSON-lines request/response format.
//! - [`server`] serves a hub over TCP, one task per connection.
//! - [`client`] is the multiplexed connection used by terminal sessions.
//! - [`session`] runs the interactive stdin loop next to the delivery loop.
//! - [`cli`] parses the command line for both modes.

pub mod cli;
pub mod client;
pub mod hub;
pub mod mailbox;
pub mod message;
pub mod participant;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
