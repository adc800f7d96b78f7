// Copyright 2020 Joyent, Inc.

use std::io;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use super::{MessageReceiver, MessageSender, Transport};

/// Carries one envelope per WebSocket text frame.
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>) -> WsTransport<S> {
        WsTransport { stream }
    }
}

pub struct WsSender<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    // Set while a send is in progress; see `close`.
    sending: bool,
}

pub struct WsReceiver<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Sender = WsSender<S>;
    type Receiver = WsReceiver<S>;

    fn split(self) -> (WsSender<S>, WsReceiver<S>) {
        let (sink, stream) = self.stream.split();
        (
            WsSender {
                sink,
                sending: false,
            },
            WsReceiver { stream },
        )
    }
}

fn ws_error(err: WsError) -> io::Error {
    match err {
        WsError::Io(e) => e,
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            io::Error::new(io::ErrorKind::NotConnected, err.to_string())
        }
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

impl<S> MessageSender for WsSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, raw: Bytes) -> io::Result<()> {
        let text = String::from_utf8(raw.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.sending = true;
        self.sink.send(Message::Text(text)).await.map_err(ws_error)?;
        self.sending = false;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.sending {
            // An abandoned frame is stuck behind a peer that is not reading;
            // the socket goes away when both halves are dropped.
            return Ok(());
        }
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ws_error(e)),
        }
    }
}

impl<S> MessageReceiver for WsReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed)) => return Ok(None),
                Some(Err(e)) => return Err(ws_error(e)),
            }
        }
    }
}
