//! JSON-lines wire format spoken between [`crate::server`] and
//! [`crate::client`].
//!
//! Every request carries a client chosen `seq` which the matching response
//! echoes, so a connection can keep a blocking `poll_one` in flight while it
//! keeps posting.

use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{hub::HubError, participant::ParticipantId};

pub const POST_ACK: &str = "message_received";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub seq: u64,
    #[serde(flatten)]
    pub call: Call,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    Join { id: ParticipantId },
    Post { id: ParticipantId, text: String },
    Leave { id: ParticipantId },
    PollOne { id: ParticipantId },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub seq: u64,
    #[serde(flatten)]
    pub reply: Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Joined { id: ParticipantId },
    Posted { id: ParticipantId, status: String },
    Left { id: ParticipantId },
    Delivered { text: String },
    EndOfStream,
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidParticipant,
    UnknownParticipant,
    AlreadyJoined,
    /// The call names a participant this connection did not join as.
    NotJoinedHere,
}

impl Reply {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Reply::Error {
            code,
            message: message.into(),
        }
    }
}

impl From<HubError> for Reply {
    fn from(err: HubError) -> Self {
        let code = match err {
            HubError::InvalidParticipant => ErrorCode::InvalidParticipant,
            HubError::UnknownParticipant(_) => ErrorCode::UnknownParticipant,
        };
        Reply::error(code, err.to_string())
    }
}

impl From<Option<String>> for Reply {
    fn from(polled: Option<String>) -> Self {
        match polled {
            Some(text) => Reply::Delivered { text },
            None => Reply::EndOfStream,
        }
    }
}

/// Reads the next non-blank line and decodes it. `Ok(None)` on clean EOF.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.trim().is_empty() {
            continue;
        }

        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(invalid_data);
    }
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(frame).map_err(invalid_data)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

fn invalid_data(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_is_flat() {
        let request = Request {
            seq: 7,
            call: Call::Post {
                id: "alice".into(),
                text: "hi".into(),
            },
        };

        let encoded = serde_json::to_value(&request).expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({"seq": 7, "call": "post", "id": "alice", "text": "hi"})
        );
    }

    #[test]
    fn hub_errors_map_to_codes() {
        let reply = Reply::from(HubError::UnknownParticipant("bob".into()));
        assert!(matches!(
            reply,
            Reply::Error {
                code: ErrorCode::UnknownParticipant,
                ref message,
            } if message.contains("bob")
        ));
    }

    #[test]
    fn error_codes_are_snake_case() {
        let encoded = serde_json::to_value(Reply::error(ErrorCode::NotJoinedHere, "nope"))
            .expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({"reply": "error", "code": "not_joined_here", "message": "nope"})
        );
    }

    #[tokio::test]
    async fn reader_skips_blank_lines() {
        let input: &[u8] = b"\n  \r\n{\"seq\":1,\"reply\":\"end_of_stream\"}\n";
        let mut reader = tokio::io::BufReader::new(input);

        let response: Response = read_frame(&mut reader)
            .await
            .expect("read frame")
            .expect("one frame");
        assert_eq!(
            response,
            Response {
                seq: 1,
                reply: Reply::EndOfStream
            }
        );

        let eof: Option<Response> = read_frame(&mut reader).await.expect("eof");
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn garbage_is_invalid_data() {
        let input: &[u8] = b"not json\n";
        let mut reader = tokio::io::BufReader::new(input);

        let err = read_frame::<_, Request>(&mut reader)
            .await
            .expect_err("should not parse");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        let request = Request {
            seq: 3,
            call: Call::PollOne { id: "carol".into() },
        };

        write_frame(&mut writer, &request).await.expect("write");
        let parsed: Request = read_frame(&mut reader)
            .await
            .expect("read")
            .expect("frame");

        assert_eq!(parsed, request);
    }
}
