// Copyright 2020 Joyent, Inc.

//! The codec contract: how envelopes are read from and written to a
//! connection, independent of their encoding.
//!
//! Reading is split in two. `read_header` returns only the routing fields;
//! the body is kept undecoded until whoever owns the message (the pending
//! call for a reply, the registered handler for a request) knows what type
//! it should be decoded into.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::header::Header;

/// An undecoded message body.
pub trait RawBody: Send + 'static {
    /// True when the envelope carried no body.
    fn is_empty(&self) -> bool;

    /// Decode the body. An absent body decodes to `T::default()`.
    fn decode<T: DeserializeOwned + Default>(&self) -> Result<T, Error>;
}

/// The inbound half of a codec. Only one task reads from it.
pub trait ReadCodec: Send + 'static {
    type Body: RawBody;

    /// Wait for the next envelope and return its header. Any state left
    /// over from the previous envelope is discarded first. Returns
    /// `Ok(None)` at end-of-stream.
    fn read_header(
        &mut self,
    ) -> impl Future<Output = Result<Option<Header>, Error>> + Send;

    /// Take the body of the envelope most recently returned by
    /// `read_header`: its `Params` if `is_request`, else its `Response`.
    fn read_body(&mut self, is_request: bool) -> Result<Self::Body, Error>;
}

/// The outbound half of a codec. Callers serialize access to it.
pub trait WriteCodec: Send + 'static {
    /// Write one envelope. `body` goes into `Params` when the header is a
    /// request and into `Response` otherwise.
    fn write_message<B>(
        &mut self,
        header: &Header,
        body: Option<&B>,
    ) -> impl Future<Output = Result<(), Error>> + Send
    where
        B: Serialize + Sync + ?Sized;

    /// Release the transport. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

pub trait Codec: Send + 'static {
    type Reader: ReadCodec;
    type Writer: WriteCodec;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// The body type produced by a codec's reader.
pub type BodyOf<C> = <<C as Codec>::Reader as ReadCodec>::Body;
