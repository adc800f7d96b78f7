// Copyright 2020 Joyent, Inc.

use std::io;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::{MessageReceiver, MessageSender, Transport};
use crate::config::Config;
use crate::protocol::JsonStreamCodec;

/// Carries envelopes over a byte stream such as a TCP or TLS socket, as a
/// sequence of JSON values.
#[derive(Debug)]
pub struct StreamTransport<T> {
    io: T,
    codec: JsonStreamCodec,
}

impl<T> StreamTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(io: T) -> StreamTransport<T> {
        StreamTransport {
            io,
            codec: JsonStreamCodec::default(),
        }
    }

    /// Use the frame limit from `config`.
    pub fn from_config(io: T, config: &Config) -> StreamTransport<T> {
        StreamTransport::with_max_frame_len(io, config.max_frame_len)
    }

    pub fn with_max_frame_len(io: T, max_frame_len: usize) -> StreamTransport<T> {
        StreamTransport {
            io,
            codec: JsonStreamCodec::new(max_frame_len),
        }
    }
}

pub struct StreamSender<T> {
    framed: FramedWrite<WriteHalf<T>, JsonStreamCodec>,
    // Set while a send is in progress. Still set at close means a send was
    // abandoned and the buffer holds a partial envelope.
    sending: bool,
}

pub struct StreamReceiver<T> {
    framed: FramedRead<ReadHalf<T>, JsonStreamCodec>,
}

impl<T> Transport for StreamTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    type Sender = StreamSender<T>;
    type Receiver = StreamReceiver<T>;

    fn split(self) -> (StreamSender<T>, StreamReceiver<T>) {
        let (rd, wr) = tokio::io::split(self.io);
        (
            StreamSender {
                framed: FramedWrite::new(wr, self.codec.clone()),
                sending: false,
            },
            StreamReceiver {
                framed: FramedRead::new(rd, self.codec),
            },
        )
    }
}

impl<T> MessageSender for StreamSender<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&mut self, raw: Bytes) -> io::Result<()> {
        self.sending = true;
        self.framed.send(raw).await?;
        self.sending = false;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.sending {
            // Flushing would block behind a peer that is not reading.
            return self.framed.get_mut().shutdown().await;
        }
        SinkExt::close(&mut self.framed).await
    }
}

impl<T> MessageReceiver for StreamReceiver<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn receive(&mut self) -> io::Result<Option<Bytes>> {
        self.framed.next().await.transpose()
    }
}
