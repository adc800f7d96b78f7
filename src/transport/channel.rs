// Copyright 2020 Joyent, Inc.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{MessageReceiver, MessageSender, Transport};

/// One end of an in-process message transport.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Create two connected in-process transport ends.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport { tx: a_tx, rx: a_rx },
        ChannelTransport { tx: b_tx, rx: b_rx },
    )
}

#[derive(Debug)]
pub struct ChannelSender {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

#[derive(Debug)]
pub struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Transport for ChannelTransport {
    type Sender = ChannelSender;
    type Receiver = ChannelReceiver;

    fn split(self) -> (ChannelSender, ChannelReceiver) {
        (
            ChannelSender { tx: Some(self.tx) },
            ChannelReceiver { rx: self.rx },
        )
    }
}

impl MessageSender for ChannelSender {
    async fn send(&mut self, raw: Bytes) -> io::Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "channel is closed")
        })?;
        tx.send(raw)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer has gone away"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx.take();
        Ok(())
    }
}

impl MessageReceiver for ChannelReceiver {
    async fn receive(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_seen_as_end_of_stream() {
        let (a, b) = channel_pair();
        let (mut a_tx, _a_rx) = a.split();
        let (_b_tx, mut b_rx) = b.split();

        a_tx.send(Bytes::from_static(b"{}")).await.unwrap();
        a_tx.close().await.unwrap();
        assert!(a_tx.send(Bytes::from_static(b"{}")).await.is_err());

        assert_eq!(b_rx.receive().await.unwrap(), Some(Bytes::from_static(b"{}")));
        assert_eq!(b_rx.receive().await.unwrap(), None);
    }
}
