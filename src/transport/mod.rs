// Copyright 2020 Joyent, Inc.

//! Transports carry whole envelopes between peers. The codec only relies on
//! the three operations defined here: send one message, receive one
//! message, close.

use std::future::Future;
use std::io;

use bytes::Bytes;

mod channel;
mod stream;
mod ws;

pub use self::channel::{channel_pair, ChannelReceiver, ChannelSender, ChannelTransport};
pub use self::stream::{StreamReceiver, StreamSender, StreamTransport};
pub use self::ws::{WsReceiver, WsSender, WsTransport};

pub trait MessageSender: Send + 'static {
    fn send(&mut self, raw: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

pub trait MessageReceiver: Send + 'static {
    /// Returns `Ok(None)` once the peer has closed its side.
    fn receive(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;
}

/// A duplex transport that can be split into independently owned halves.
pub trait Transport: Send + 'static {
    type Sender: MessageSender;
    type Receiver: MessageReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver);
}
