//! The chunk-service wire protocol.
//!
//! The router and the chunk servers speak a framed protocol over TCP.
//! Every frame is a 4-byte little-endian length prefix followed by a
//! bincode-encoded [`Request`] or [`Response`]. One connection carries
//! one exchange at a time; concurrent calls to the same server use
//! separate connections.
//!
//! A store (PUT) exchange is a header frame carrying the chunk id and
//! the expected digest, zero or more data frames, and an end frame;
//! the server acknowledges after verifying the digest. A fetch (GET)
//! exchange is one request frame answered by data frames of at most
//! [`DATA_FRAME_SIZE`] bytes, terminated by an end frame. Delete and
//! health are single request/response pairs. Any operation may be
//! answered with an [`Response::Error`] frame instead.

use std::error::Error as StdError;
use std::io;

use displaydoc::Display;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::hash::Checksum;

/// Maximum encoded frame size accepted on either side.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024 * 1024;

/// Payload size of one data frame.
pub const DATA_FRAME_SIZE: usize = 64 * 1024;

/// A protocol error.
#[derive(Debug, Display)]
pub enum ProtoError {
    /// Frame of {len} bytes exceeds the {max}-byte limit.
    FrameTooLarge { len: usize, max: usize },

    /// Failed to encode frame: {0}
    Encode(bincode::Error),

    /// Failed to decode frame: {0}
    Decode(bincode::Error),

    /// I/O error: {0}
    Io(io::Error),
}

impl StdError for ProtoError {}

impl From<io::Error> for ProtoError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

/// Status of a chunk-service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    /// The request was malformed.
    InvalidArgument,
    /// The chunk does not exist on this server.
    NotFound,
    /// Stored or received bytes do not match the expected digest.
    DataLoss,
    /// The server is out of disk space.
    ResourceExhausted,
    /// The server cannot take the request right now.
    Unavailable,
    /// Anything else.
    Internal,
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::DataLoss => "DataLoss",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::Unavailable => "Unavailable",
            Self::Internal => "Internal",
        }
    }
}

/// A frame sent by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Opens a store exchange.
    ///
    /// `checksum` is the SHA-256 of the concatenation of all data
    /// frames that follow.
    PutBegin { chunk_id: Uuid, checksum: Checksum },

    /// One span of chunk bytes.
    PutData { data: Vec<u8> },

    /// Ends a store exchange; the server verifies and acknowledges.
    PutEnd,

    /// Fetches a chunk.
    Get { chunk_id: Uuid },

    /// Deletes a chunk.
    Delete { chunk_id: Uuid },

    /// Asks for a disk usage report.
    Health,
}

/// A frame sent by a chunk server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// The chunk is durably stored.
    PutAck { chunk_id: Uuid, size: u64 },

    /// One span of chunk bytes.
    Data { data: Vec<u8> },

    /// End of a fetch exchange.
    End,

    /// The chunk file is gone.
    DeleteAck { chunk_id: Uuid },

    /// Disk usage report.
    Health(HealthReport),

    /// Terminal failure of the current exchange.
    Error { status: Status, message: String },
}

/// Disk usage of a chunk server's data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub available: u64,
    pub used: u64,
    pub total: u64,
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(frame).map_err(ProtoError::Encode)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;

    Ok(())
}

/// Reads one length-prefixed frame.
///
/// The length is validated against [`MAX_FRAME_SIZE`] before any
/// payload byte is read, so a corrupt prefix cannot trigger a huge
/// allocation.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtoError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    bincode::deserialize(&payload).map_err(ProtoError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::block_on;

    #[test]
    fn test_request_round_trip() {
        block_on(async {
            let (mut client, mut server) = tokio::io::duplex(1024 * 1024);

            let chunk_id = Uuid::new_v4();
            let checksum = Checksum::sha256_from_bytes(b"payload");

            write_frame(&mut client, &Request::PutBegin { chunk_id, checksum })
                .await
                .unwrap();
            write_frame(
                &mut client,
                &Request::PutData {
                    data: b"payload".to_vec(),
                },
            )
            .await
            .unwrap();
            write_frame(&mut client, &Request::PutEnd).await.unwrap();

            match read_frame::<_, Request>(&mut server).await.unwrap() {
                Request::PutBegin {
                    chunk_id: got_id,
                    checksum: got_sum,
                } => {
                    assert_eq!(got_id, chunk_id);
                    assert_eq!(got_sum, checksum);
                }
                other => panic!("unexpected frame: {:?}", other),
            }

            match read_frame::<_, Request>(&mut server).await.unwrap() {
                Request::PutData { data } => assert_eq!(data, b"payload"),
                other => panic!("unexpected frame: {:?}", other),
            }

            assert!(matches!(
                read_frame::<_, Request>(&mut server).await.unwrap(),
                Request::PutEnd
            ));
        });
    }

    #[test]
    fn test_error_response_round_trip() {
        block_on(async {
            let (mut client, mut server) = tokio::io::duplex(4096);

            write_frame(
                &mut server,
                &Response::Error {
                    status: Status::DataLoss,
                    message: "checksum mismatch".to_string(),
                },
            )
            .await
            .unwrap();

            match read_frame::<_, Response>(&mut client).await.unwrap() {
                Response::Error { status, message } => {
                    assert_eq!(status, Status::DataLoss);
                    assert_eq!(message, "checksum mismatch");
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        });
    }

    #[test]
    fn test_rejects_oversized_prefix() {
        block_on(async {
            let (mut client, mut server) = tokio::io::duplex(4096);

            let len = (MAX_FRAME_SIZE as u32) + 1;
            client.write_all(&len.to_le_bytes()).await.unwrap();

            let result = read_frame::<_, Request>(&mut server).await;
            assert!(matches!(result, Err(ProtoError::FrameTooLarge { .. })));
        });
    }
}
