//! Request-reply channel to one server endpoint at a time.
//!
//! TCP realization of a REQ socket: connect lazily, announce the client identity in a
//! one-frame greeting, send `[empty, payload]`, expect `[empty, payload]` back. A refused
//! connection is retried until the caller's deadline; a connection lost after the request
//! was written is never re-sent and surfaces as a timeout.

use std::io;
use std::time::Duration;

use byne_core::{
    encode_message, ClientIdentity, Endpoint, EndpointError, FrameBuffer, FrameDecodeError,
    FrameEncodeError,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);
const REBIND_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 4096;

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Reply(Vec<u8>),
    /// No reply within the window. The connection has been discarded.
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Decode(#[from] FrameDecodeError),
    #[error("framing error: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("malformed reply envelope ({frames} frames)")]
    Envelope { frames: usize },
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] EndpointError),
}

/// Single-outstanding-request channel. `&mut self` keeps requests from overlapping.
pub trait Channel {
    /// Send `payload` and wait for the reply. `None` waits indefinitely.
    async fn request(
        &mut self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Exchange, TransportError>;

    /// Drop the current connection and bind to `endpoint`, re-sending the identity.
    async fn rebind(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    fn endpoint(&self) -> &Endpoint;
}

pub struct TcpChannel {
    endpoint: Endpoint,
    identity: ClientIdentity,
    stream: Option<TcpStream>,
    buffer: FrameBuffer,
}

impl TcpChannel {
    /// Bind to `endpoint`. The connection itself is opened by the first request.
    pub fn connect(endpoint: Endpoint, identity: ClientIdentity) -> Self {
        Self {
            endpoint,
            identity,
            stream: None,
            buffer: FrameBuffer::new(),
        }
    }

    async fn open(&self) -> Result<TcpStream, TransportError> {
        let addr = self.endpoint.connect_addr()?;
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let greeting = encode_message(&[self.identity.as_bytes()])?;
        stream.write_all(&greeting).await?;
        debug!(endpoint = %self.endpoint, "connected");
        Ok(stream)
    }

    /// Current connection, or a new one; refused connections are retried forever.
    async fn connected(&mut self) -> Result<TcpStream, TransportError> {
        if let Some(stream) = self.stream.take() {
            return Ok(stream);
        }
        self.buffer.clear();
        loop {
            match self.open().await {
                Ok(stream) => return Ok(stream),
                Err(TransportError::Io(e)) => {
                    debug!(endpoint = %self.endpoint, error = %e, "connect failed; retrying");
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let request = encode_message(&[&[][..], payload])?;
        let mut stream = loop {
            let mut stream = self.connected().await?;
            match stream.write_all(&request).await {
                Ok(()) => break stream,
                Err(e) => debug!(endpoint = %self.endpoint, error = %e, "send failed; reconnecting"),
            }
        };
        match read_message(&mut stream, &mut self.buffer).await {
            Ok(frames) => {
                self.stream = Some(stream);
                unwrap_envelope(frames)
            }
            Err(TransportError::Io(e)) => {
                warn!(endpoint = %self.endpoint, error = %e, "connection lost awaiting reply");
                std::future::pending().await
            }
            Err(e) => Err(e),
        }
    }
}

impl Channel for TcpChannel {
    async fn request(
        &mut self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Exchange, TransportError> {
        let Some(limit) = timeout else {
            return self.exchange(payload).await.map(Exchange::Reply);
        };
        let outcome = tokio::time::timeout(limit, self.exchange(payload)).await;
        match outcome {
            Ok(reply) => reply.map(Exchange::Reply),
            Err(_) => {
                // The in-flight stream was owned by the dropped exchange; a stale reply cannot reach the next request.
                self.stream = None;
                self.buffer.clear();
                Ok(Exchange::TimedOut)
            }
        }
    }

    async fn rebind(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.stream = None;
        self.buffer.clear();
        self.endpoint = endpoint.clone();
        match tokio::time::timeout(REBIND_CONNECT_TIMEOUT, self.open()).await {
            Ok(stream) => {
                self.stream = Some(stream?);
                Ok(())
            }
            Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut).into()),
        }
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Read one complete multipart message.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
) -> Result<Vec<Vec<u8>>, TransportError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(frames) = buffer.next_message()? {
            return Ok(frames);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        buffer.extend(&chunk[..n]);
    }
}

fn unwrap_envelope(mut frames: Vec<Vec<u8>>) -> Result<Vec<u8>, TransportError> {
    if frames.len() != 2 || !frames[0].is_empty() {
        return Err(TransportError::Envelope {
            frames: frames.len(),
        });
    }
    Ok(frames.swap_remove(1))
}
