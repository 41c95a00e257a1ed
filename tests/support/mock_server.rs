//! A minimal loopback RESP server for integration tests.
//!
//! Supports only the commands the trimmed [`redis_conn_core::clients::Client`]
//! issues: `PING`, `GET`, `SET` (expiry argument accepted and ignored),
//! `DEL`, `PUBLISH`. Hand-rolled directly against `Frame` rather than
//! pulling in a full command-dispatch stack, since the tests only need a
//! cooperative peer to drive the handler's write/read paths against.

use bytes::{Buf, Bytes, BytesMut};
use redis_conn_core::Frame;
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct MockServer {
    pub addr: SocketAddr,
    accept_task: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockServer {
    /// Starts a server that replies to every request it receives.
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Starts a server that stops replying (closing the socket instead)
    /// once it has served `limit` total requests across all connections —
    /// for exercising disconnect/replay behavior.
    pub async fn start_dropping_after(limit: usize) -> Self {
        Self::start_with(Some(limit)).await
    }

    async fn start_with(drop_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server listener");
        let addr = listener.local_addr().expect("mock server local addr");
        let served = Arc::new(AtomicUsize::new(0));
        let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_connections = connections.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let task = tokio::spawn(serve_connection(socket, served.clone(), drop_after));
                accept_connections.lock().unwrap().push(task);
            }
        });

        Self {
            addr,
            accept_task,
            connections,
        }
    }

    /// Stops accepting new connections and closes every connection
    /// currently being served, so an attached client observes EOF.
    pub fn stop(self) {
        self.accept_task.abort();
        for task in self.connections.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

async fn serve_connection(mut socket: TcpStream, served: Arc<AtomicUsize>, drop_after: Option<usize>) {
    let mut db: HashMap<String, Bytes> = HashMap::new();
    let mut buf = BytesMut::with_capacity(4 * 1024);

    loop {
        let frame = match read_frame(&mut socket, &mut buf).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(_) => return,
        };

        let served_count = served.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = drop_after {
            if served_count > limit {
                return;
            }
        }

        let response = handle(&mut db, frame);
        if write_frame(&mut socket, &response).await.is_err() {
            return;
        }
    }
}

async fn read_frame(socket: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Option<Frame>> {
    loop {
        let mut cursor = Cursor::new(&buf[..]);
        match Frame::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::from(&mut cursor);
                buf.advance(len);
                return Ok(Some(frame));
            }
            Err(_) => {
                let mut chunk = [0u8; 1024];
                let n = socket.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

fn handle(db: &mut HashMap<String, Bytes>, frame: Frame) -> Frame {
    let Frame::Array(items) = frame else {
        return Frame::Error("ERR expected array frame".into());
    };

    let mut args = items.into_iter();
    let name = match args.next() {
        Some(Frame::Bulk(name)) => name,
        _ => return Frame::Error("ERR expected command name".into()),
    };

    let rest: Vec<Frame> = args.collect();

    match name.to_ascii_lowercase().as_slice() {
        b"ping" => match rest.into_iter().next() {
            Some(Frame::Bulk(msg)) => Frame::Bulk(msg),
            _ => Frame::Simple("PONG".into()),
        },
        b"get" => {
            let key = bulk_string(&rest[0]);
            match db.get(&key) {
                Some(value) => Frame::Bulk(value.clone()),
                None => Frame::Null,
            }
        }
        b"set" => {
            let key = bulk_string(&rest[0]);
            let value = match &rest[1] {
                Frame::Bulk(v) => v.clone(),
                _ => Bytes::new(),
            };
            db.insert(key, value);
            Frame::Simple("OK".into())
        }
        b"del" => {
            let mut count = 0u64;
            for item in &rest {
                if db.remove(&bulk_string(item)).is_some() {
                    count += 1;
                }
            }
            let _ = count;
            Frame::Simple("OK".into())
        }
        b"publish" => Frame::Integer(0),
        other => Frame::Error(format!("ERR unknown command '{}'", String::from_utf8_lossy(other))),
    }
}

fn bulk_string(frame: &Frame) -> String {
    match frame {
        Frame::Bulk(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    }
}

async fn write_frame(socket: &mut TcpStream, frame: &Frame) -> std::io::Result<()> {
    match frame {
        Frame::Simple(val) => {
            socket.write_all(b"+").await?;
            socket.write_all(val.as_bytes()).await?;
            socket.write_all(b"\r\n").await
        }
        Frame::Error(val) => {
            socket.write_all(b"-").await?;
            socket.write_all(val.as_bytes()).await?;
            socket.write_all(b"\r\n").await
        }
        Frame::Integer(val) => socket.write_all(format!(":{}\r\n", val).as_bytes()).await,
        Frame::Null => socket.write_all(b"$-1\r\n").await,
        Frame::Bulk(val) => {
            socket.write_all(format!("${}\r\n", val.len()).as_bytes()).await?;
            socket.write_all(val).await?;
            socket.write_all(b"\r\n").await
        }
        Frame::Array(_) => unimplemented!("mock server never sends array responses"),
    }
}
