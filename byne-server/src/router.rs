//! TCP router: one task per connection, identity taken from the greeting, every
//! request routed through the shared `ServerCore`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use byne_core::{encode_message, FrameBuffer, ServerCore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type SharedCore = Arc<Mutex<ServerCore>>;

pub async fn run_router(listener: TcpListener, core: SharedCore) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let core = core.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer, core).await {
                debug!(%peer, error = %e, "connection closed");
            }
        });
    }
}

async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, core: SharedCore) -> io::Result<()> {
    let mut buffer = FrameBuffer::new();
    let greeting = read_message(&mut stream, &mut buffer).await?;
    let identity = match <[Vec<u8>; 1]>::try_from(greeting) {
        Ok([identity]) => identity,
        Err(frames) => {
            warn!(%peer, frames = frames.len(), "greeting must be a single identity frame; closing");
            return Ok(());
        }
    };
    debug!(%peer, client = %String::from_utf8_lossy(&identity), "client connected");

    loop {
        let frames = read_message(&mut stream, &mut buffer).await?;
        let mut routed = Vec::with_capacity(frames.len() + 1);
        routed.push(identity.clone());
        routed.extend(frames);
        let reply = core.lock().await.on_message(routed);
        let Some(reply) = reply else {
            continue;
        };
        let bytes = encode_message(&reply[1..])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        stream.write_all(&bytes).await?;
    }
}

async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
) -> io::Result<Vec<Vec<u8>>> {
    let mut chunk = [0u8; 4096];
    loop {
        let next = buffer
            .next_message()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(frames) = next {
            return Ok(frames);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buffer.extend(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use byne_core::{decode_reply, encode_request, Command, Reply, Request};

    async fn spawn_router(seed: u64) -> (SocketAddr, SharedCore) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let core = Arc::new(Mutex::new(ServerCore::with_seed(seed)));
        tokio::spawn(run_router(listener, core.clone()));
        (addr, core)
    }

    async fn connect(addr: SocketAddr, identity: &[u8]) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&encode_message(&[identity]).unwrap())
            .await
            .unwrap();
        stream
    }

    async fn request(stream: &mut TcpStream, buffer: &mut FrameBuffer, req: Request) -> Reply {
        let payload = encode_request(&req);
        stream
            .write_all(&encode_message(&[&[][..], &payload[..]]).unwrap())
            .await
            .unwrap();
        let frames = read_message(stream, buffer).await.unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_empty());
        decode_reply(req.command(), &frames[1]).unwrap()
    }

    #[tokio::test]
    async fn serves_even_numbers_and_remembers_the_last_one() {
        let (addr, core) = spawn_router(4).await;
        let mut stream = connect(addr, b"CLIENT-2").await;
        let mut buffer = FrameBuffer::new();

        let mut last = None;
        for _ in 0..20 {
            let Reply::GetEven(v) = request(&mut stream, &mut buffer, Request::GetEven).await else {
                panic!("expected get_even reply");
            };
            assert_eq!(v % 2, 0);
            assert!(v <= 98);
            last = Some(v);
        }
        let last = last.unwrap();
        assert_eq!(
            request(&mut stream, &mut buffer, Request::AcceptValue(57)).await,
            Reply::AcceptValue
        );
        assert_eq!(core.lock().await.last_value(b"CLIENT-2"), last);

        // Same identity on a fresh connection sees the last number handed out.
        let mut again = connect(addr, b"CLIENT-2").await;
        let mut buffer = FrameBuffer::new();
        assert_eq!(
            request(&mut again, &mut buffer, Request::Hello).await,
            Reply::Hello {
                version: 1,
                value: last
            }
        );
    }

    #[tokio::test]
    async fn missing_delimiter_gets_no_reply() {
        let (addr, _) = spawn_router(5).await;
        let mut stream = connect(addr, b"c").await;
        stream
            .write_all(&encode_message(&[[Command::GetOdd.as_byte()].as_slice()]).unwrap())
            .await
            .unwrap();
        let mut buffer = FrameBuffer::new();
        let read = tokio::time::timeout(
            Duration::from_millis(300),
            read_message(&mut stream, &mut buffer),
        )
        .await;
        assert!(read.is_err(), "no reply expected");
    }

    #[tokio::test]
    async fn multi_frame_greeting_closes_connection() {
        let (addr, _) = spawn_router(6).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&encode_message(&[b"a".as_slice(), b"b".as_slice()]).unwrap())
            .await
            .unwrap();
        let mut sink = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut sink))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
