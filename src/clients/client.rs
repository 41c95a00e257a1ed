//! A minimal Redis client built directly on [`ConnectionHandler`].
//!
//! Each call encodes a request `Frame`, submits it through the handler's
//! write path, and awaits the command's own oneshot completion — there is
//! no request/response pairing logic here beyond that; FIFO ordering and
//! reconnect replay are the handler's job (§4).

use crate::command::{encode_args, SimpleCommand};
use crate::error::HandlerError;
use crate::frame::Frame;
use crate::handler::ConnectionHandler;
use crate::options::HandlerOptions;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::ToSocketAddrs;
use tracing::{debug, instrument};

/// A connection to a Redis server, backed by one [`ConnectionHandler`].
pub struct Client {
    handler: Arc<ConnectionHandler>,
}

impl Client {
    /// Connects to `addr` with default [`HandlerOptions`].
    pub async fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<Client> {
        Self::connect_with_options(addr, HandlerOptions::default()).await
    }

    /// Connects to `addr` with caller-supplied options (§6).
    pub async fn connect_with_options<T: ToSocketAddrs>(addr: T, options: HandlerOptions) -> crate::Result<Client> {
        let handler = ConnectionHandler::connect(addr, options)
            .await
            .map_err(|e| -> crate::Error { Box::new(e) })?;
        Ok(Client { handler })
    }

    /// Exposes the underlying handler for callers that need lifecycle
    /// control (`reset`, `close`) or a custom [`crate::handler::UpperHandler`].
    pub fn handler(&self) -> &Arc<ConnectionHandler> {
        &self.handler
    }

    async fn roundtrip(&self, frame: Frame) -> crate::Result<Frame> {
        let (cmd, rx) = SimpleCommand::new(frame);
        self.handler.write(cmd).await.map_err(|e| -> crate::Error { Box::new(e) })?;

        match rx.await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(cause)) => Err(cause.into()),
            Err(_) => Err(HandlerError::Reset.to_string().into()),
        }
    }

    /// Sends a `PING`. Returns `PONG`, or a copy of `msg` if one was given.
    #[instrument(skip(self))]
    pub async fn ping(&self, msg: Option<Bytes>) -> crate::Result<Bytes> {
        let mut args = vec![Bytes::from_static(b"ping")];
        args.extend(msg);
        let frame = encode_args(args);
        debug!(request = ?frame);

        match self.roundtrip(frame).await? {
            Frame::Simple(value) => Ok(value.into()),
            Frame::Bulk(value) => Ok(value),
            frame => Err(unexpected(&frame)),
        }
    }

    /// Gets the value of `key`, or `None` if it does not exist.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> crate::Result<Option<Bytes>> {
        let frame = encode_args([Bytes::from_static(b"get"), Bytes::from(key.to_string())]);
        debug!(request = ?frame);

        match self.roundtrip(frame).await? {
            Frame::Simple(value) => Ok(Some(value.into())),
            Frame::Bulk(value) => Ok(Some(value)),
            Frame::Null => Ok(None),
            frame => Err(unexpected(&frame)),
        }
    }

    /// Sets `key` to `value` with no expiration.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: Bytes) -> crate::Result<()> {
        self.set_cmd(key, value, None).await
    }

    /// Sets `key` to `value`, expiring after `expiration`.
    #[instrument(skip(self, value))]
    pub async fn set_expires(&self, key: &str, value: Bytes, expiration: Duration) -> crate::Result<()> {
        self.set_cmd(key, value, Some(expiration)).await
    }

    async fn set_cmd(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> crate::Result<()> {
        let mut args = vec![Bytes::from_static(b"set"), Bytes::from(key.to_string()), value];
        if let Some(expiration) = expiration {
            args.push(Bytes::from_static(b"px"));
            args.push(Bytes::from(expiration.as_millis().to_string()));
        }
        let frame = encode_args(args);
        debug!(request = ?frame);

        match self.roundtrip(frame).await? {
            Frame::Simple(response) if response == "OK" => Ok(()),
            frame => Err(unexpected(&frame)),
        }
    }

    /// Deletes `keys`.
    #[instrument(skip(self))]
    pub async fn del(&self, keys: Vec<String>) -> crate::Result<()> {
        let mut args = vec![Bytes::from_static(b"del")];
        args.extend(keys.into_iter().map(Bytes::from));
        let frame = encode_args(args);
        debug!(request = ?frame);

        match self.roundtrip(frame).await? {
            Frame::Simple(response) if response == "OK" => Ok(()),
            frame => Err(unexpected(&frame)),
        }
    }

    /// Publishes `message` to `channel`. Returns the number of subscribers
    /// the server reports as currently listening.
    #[instrument(skip(self, message))]
    pub async fn publish(&self, channel: &str, message: Bytes) -> crate::Result<u64> {
        let frame = encode_args([Bytes::from_static(b"publish"), Bytes::from(channel.to_string()), message]);
        debug!(request = ?frame);

        match self.roundtrip(frame).await? {
            Frame::Integer(response) => Ok(response),
            frame => Err(unexpected(&frame)),
        }
    }
}

fn unexpected(frame: &Frame) -> crate::Error {
    format!("unexpected frame: {}", frame).into()
}
