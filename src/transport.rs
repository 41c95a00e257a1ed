//! The transport collaborator (§1, §5).
//!
//! Specified only as a duplex byte channel with write/flush/close and
//! liveness events. This crate implements that contract directly over a
//! `tokio::net::TcpStream` split into owned halves: the write half lives
//! behind the handler's write lock, and the read half is driven by a
//! single dedicated reader task — the closest tokio analogue to a
//! single-threaded reactor thread available without writing a custom
//! `mio`-level event loop (§5's "I/O context").

use crate::frame::Frame;
use crate::handler::ConnectionHandler;
use bytes::BytesMut;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::trace;

/// Connects to `addr` and splits the resulting stream into owned halves.
pub(crate) async fn connect_tcp(
    addr: impl ToSocketAddrs,
) -> io::Result<(OwnedReadHalf, OwnedWriteHalf, SocketAddr)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let (read_half, write_half) = stream.into_split();
    Ok((read_half, write_half, peer))
}

/// Spawns the reader task: the single-threaded "I/O context" of §5. Reads
/// chunks off `read_half` and feeds them to the handler's read path until
/// EOF, an unrecoverable protocol error, or `close()` requests a stop.
///
/// Generic over the read half rather than pinned to `OwnedReadHalf` so the
/// same loop drives both a real `TcpStream` split and, in `handler.rs`'s
/// unit tests, an in-memory `tokio::io::duplex` pair (§8).
pub(crate) fn spawn_reader<R>(handler: Arc<ConnectionHandler>, mut read_half: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; 4 * 1024];
        loop {
            let read_result = tokio::select! {
                biased;
                _ = handler.close_requested().notified() => break,
                res = read_half.read(&mut chunk) => res,
            };

            let n = match read_result {
                Ok(n) => n,
                Err(e) => {
                    handler.on_exception(e.into()).await;
                    break;
                }
            };

            if n == 0 {
                // Peer closed the connection (EOF).
                break;
            }

            trace!(bytes = n, "received raw bytes");
            let mut buf = BytesMut::with_capacity(n);
            buf.extend_from_slice(&chunk[..n]);
            if let Err(e) = handler.on_read(buf).await {
                handler.on_exception(e).await;
                break;
            }
        }

        handler.on_inactive().await;
        handler.on_unregistered().await;
    })
}

/// Writes one request frame onto the wire. Generic over any `AsyncWrite`
/// half rather than a concrete `BufWriter<TcpStream>`.
pub(crate) async fn write_frame<W>(w: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Frame::Array(items) => {
            w.write_u8(b'*').await?;
            write_decimal(w, items.len() as u64).await?;
            for item in items {
                write_value(w, item).await?;
            }
        }
        _ => write_value(w, frame).await?,
    }
    Ok(())
}

async fn write_value<W>(w: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Frame::Simple(val) => {
            w.write_u8(b'+').await?;
            w.write_all(val.as_bytes()).await?;
            w.write_all(b"\r\n").await?;
        }
        Frame::Error(val) => {
            w.write_u8(b'-').await?;
            w.write_all(val.as_bytes()).await?;
            w.write_all(b"\r\n").await?;
        }
        Frame::Integer(val) => {
            w.write_u8(b':').await?;
            write_decimal(w, *val).await?;
        }
        Frame::Null => {
            w.write_all(b"$-1\r\n").await?;
        }
        Frame::Bulk(val) => {
            let len = val.len();
            w.write_u8(b'$').await?;
            write_decimal(w, len as u64).await?;
            w.write_all(val).await?;
            w.write_all(b"\r\n").await?;
        }
        // Encoding an Array from within `write_value` would recurse into
        // `write_frame`, and recursion between two generic `async fn`s
        // can't compile (each fn's opaque future would have to embed the
        // other's, an infinite-size cycle). `write_frame` itself already
        // handles the top-level `Array` case before ever calling
        // `write_value`, and no command in this crate nests an array
        // inside another frame, so this arm is unreachable in practice.
        Frame::Array(_) => unreachable!("nested arrays are never constructed"),
    }
    Ok(())
}

async fn write_decimal<W>(w: &mut W, value: u64) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    use std::io::Write;

    let mut buf = [0u8; 20];
    let mut cursor = Cursor::new(&mut buf[..]);
    write!(&mut cursor, "{}", value)?;

    let pos = cursor.position() as usize;
    w.write_all(&cursor.get_ref()[..pos]).await?;
    w.write_all(b"\r\n").await?;
    Ok(())
}

