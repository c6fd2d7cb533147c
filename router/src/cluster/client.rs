//! Chunk-service client.
//!
//! One [`ChunkClient`] exists per live chunk server. A client keeps at
//! most one idle connection and reuses it across exchanges; concurrent
//! exchanges dial overflow connections that are dropped once the idle
//! slot is occupied again. The last observed transport state is kept
//! for the connection-health loop, which redials broken clients in the
//! background.

use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio::time;
use uuid::Uuid;

use crate::config::CONNECT_TIMEOUT;
use crate::fault::ClientError;
use hexad::hash::Checksum;
use hexad::proto::{
    read_frame, write_frame, HealthReport, ProtoError, Request, Response, Status, DATA_FRAME_SIZE,
};
use hexad::stream::read_up_to;

/// Transport state of a client, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No connection has been established yet.
    Idle,

    /// The last dial or exchange succeeded.
    Ready,

    /// The last dial or transfer failed at the transport level.
    TransientFailure,

    /// The client has been closed.
    Shutdown,
}

/// One framed connection to a chunk server.
pub(crate) struct Connection {
    io: BufStream<TcpStream>,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self {
            io: BufStream::new(stream),
        }
    }

    async fn send(&mut self, frame: &Request) -> Result<(), ProtoError> {
        write_frame(&mut self.io, frame).await
    }

    async fn recv(&mut self) -> Result<Response, ProtoError> {
        read_frame(&mut self.io).await
    }
}

fn frame_name(frame: &Response) -> &'static str {
    match frame {
        Response::PutAck { .. } => "PutAck",
        Response::Data { .. } => "Data",
        Response::End => "End",
        Response::DeleteAck { .. } => "DeleteAck",
        Response::Health(_) => "Health",
        Response::Error { .. } => "Error",
    }
}

/// A client for one chunk server.
pub struct ChunkClient {
    server_id: Uuid,
    address: String,
    idle: TokioMutex<Option<Connection>>,
    state: StdMutex<ConnState>,
}

impl ChunkClient {
    pub fn new(server_id: Uuid, address: String) -> Self {
        Self {
            server_id,
            address,
            idle: TokioMutex::new(None),
            state: StdMutex::new(ConnState::Idle),
        }
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport_state(&self) -> ConnState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnState) {
        *self.state.lock().unwrap() = state;
    }

    async fn dial(&self) -> Result<Connection, ClientError> {
        match time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                self.set_state(ConnState::Ready);
                Ok(Connection::new(stream))
            }
            Ok(Err(error)) => {
                self.set_state(ConnState::TransientFailure);
                Err(ClientError::Io(error))
            }
            Err(_) => {
                self.set_state(ConnState::TransientFailure);
                Err(ClientError::Timeout)
            }
        }
    }

    async fn checkout(&self) -> Result<Connection, ClientError> {
        if let Some(conn) = self.idle.lock().await.take() {
            return Ok(conn);
        }

        self.dial().await
    }

    async fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().await;
        if idle.is_none() {
            *idle = Some(conn);
        }
        self.set_state(ConnState::Ready);
    }

    /// Records a failed exchange. The connection is dropped by the
    /// caller; transport-level faults flip the state so the health
    /// loop picks the client up.
    fn discard(&self, error: &ClientError) {
        if matches!(error, ClientError::Io(_) | ClientError::Timeout) {
            self.set_state(ConnState::TransientFailure);
        }
    }

    /// Re-establishes the idle connection, bounded by the connect
    /// timeout.
    pub async fn redial(&self) -> Result<(), ClientError> {
        let conn = self.dial().await?;
        *self.idle.lock().await = Some(conn);
        Ok(())
    }

    /// Drops the idle connection and refuses further exchanges until a
    /// redial.
    pub async fn shutdown(&self) {
        self.idle.lock().await.take();
        self.set_state(ConnState::Shutdown);
    }

    async fn exchange(&self, request: Request) -> Result<Response, ClientError> {
        let mut conn = self.checkout().await?;

        let result: Result<Response, ClientError> = async {
            conn.send(&request).await?;
            Ok(conn.recv().await?)
        }
        .await;

        match result {
            Ok(response) => {
                self.checkin(conn).await;
                Ok(response)
            }
            Err(error) => {
                self.discard(&error);
                Err(error)
            }
        }
    }

    /// Streams a chunk to the server and awaits its acknowledgment.
    ///
    /// Returns the number of bytes the server committed.
    pub async fn put_chunk<R>(
        &self,
        chunk_id: Uuid,
        checksum: Checksum,
        source: R,
    ) -> Result<u64, ClientError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut conn = self.checkout().await?;

        let result = Self::put_exchange(&mut conn, chunk_id, checksum, source).await;

        match result {
            Ok(size) => {
                self.checkin(conn).await;
                Ok(size)
            }
            Err(error) => {
                self.discard(&error);
                Err(error)
            }
        }
    }

    async fn put_exchange<R>(
        conn: &mut Connection,
        chunk_id: Uuid,
        checksum: Checksum,
        mut source: R,
    ) -> Result<u64, ClientError>
    where
        R: AsyncRead + Unpin + Send,
    {
        conn.send(&Request::PutBegin { chunk_id, checksum }).await?;

        loop {
            let bytes = read_up_to(&mut source, DATA_FRAME_SIZE).await?;
            if bytes.is_empty() {
                break;
            }

            conn.send(&Request::PutData {
                data: bytes.to_vec(),
            })
            .await?;
        }

        conn.send(&Request::PutEnd).await?;

        match conn.recv().await? {
            Response::PutAck { size, .. } => Ok(size),
            Response::Error { status, message } => Err(ClientError::Remote { status, message }),
            other => Err(ClientError::Protocol(format!(
                "unexpected {} frame in store exchange",
                frame_name(&other)
            ))),
        }
    }

    /// Opens a receive stream for a chunk.
    ///
    /// The returned stream yields the chunk bytes in frame-sized
    /// pieces. Establishment errors (including a server-side refusal)
    /// surface here; errors past the first byte surface inside the
    /// stream and abort it.
    pub async fn open_chunk_stream(
        self: Arc<Self>,
        chunk_id: Uuid,
    ) -> Result<BoxStream<'static, Result<Bytes, ClientError>>, ClientError> {
        let mut conn = self.checkout().await?;

        let opened: Result<Response, ClientError> = async {
            conn.send(&Request::Get { chunk_id }).await?;
            Ok(conn.recv().await?)
        }
        .await;

        let first = match opened {
            Ok(Response::Error { status, message }) => {
                self.checkin(conn).await;
                return Err(ClientError::Remote { status, message });
            }
            Ok(frame) => frame,
            Err(error) => {
                self.discard(&error);
                return Err(error);
            }
        };

        let client = self;
        let stream = try_stream! {
            let mut conn = conn;
            let mut pending = Some(first);

            loop {
                let frame = match pending.take() {
                    Some(frame) => frame,
                    None => match conn.recv().await {
                        Ok(frame) => frame,
                        Err(error) => {
                            let error = ClientError::from(error);
                            client.discard(&error);
                            Err(error)?;
                            unreachable!();
                        }
                    },
                };

                match frame {
                    Response::Data { data } => {
                        yield Bytes::from(data);
                    }
                    Response::End => {
                        client.checkin(conn).await;
                        break;
                    }
                    Response::Error { status, message } => {
                        Err(ClientError::Remote { status, message })?;
                    }
                    other => {
                        Err(ClientError::Protocol(format!(
                            "unexpected {} frame in fetch exchange",
                            frame_name(&other)
                        )))?;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Deletes a chunk. Returns `false` if the server did not have it.
    pub async fn delete_chunk(&self, chunk_id: Uuid) -> Result<bool, ClientError> {
        match self.exchange(Request::Delete { chunk_id }).await? {
            Response::DeleteAck { .. } => Ok(true),
            Response::Error {
                status: Status::NotFound,
                ..
            } => Ok(false),
            Response::Error { status, message } => Err(ClientError::Remote { status, message }),
            other => Err(ClientError::Protocol(format!(
                "unexpected {} frame in delete exchange",
                frame_name(&other)
            ))),
        }
    }

    /// Asks the server for a disk usage report.
    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        match self.exchange(Request::Health).await? {
            Response::Health(report) => Ok(report),
            Response::Error { status, message } => Err(ClientError::Remote { status, message }),
            other => Err(ClientError::Protocol(format!(
                "unexpected {} frame in health exchange",
                frame_name(&other)
            ))),
        }
    }
}
