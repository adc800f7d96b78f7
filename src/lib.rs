// Copyright 2020 Joyent, Inc.

//! Facade RPC: multiplexed request/response calls over one duplex
//! connection.
//!
//! Agents and API clients talk to a controller over a single long-lived
//! connection (a TLS socket or a WebSocket). Either peer may issue calls on
//! it at any time, and many calls may be in flight at once.
//!
//! Protocol definition
//!
//! Each message ("envelope") is one JSON object:
//!
//! ```text
//! { "RequestId": <uint>,
//!   "Type":      <string, omitted if empty>,
//!   "Id":        <string, omitted if empty>,
//!   "Request":   <string, omitted if empty>,
//!   "Params":    <any, present only on requests>,
//!   "Error":     <string, omitted if empty>,
//!   "ErrorCode": <string, omitted if empty>,
//!   "Response":  <any, present only on replies> }
//! ```
//!
//! * RequestId  chosen by the caller, unique among its outstanding calls and
//!              echoed in the reply. Zero is reserved for notifications,
//!              which are never answered.
//!
//! * Type, Id   the facade type and instance the request is addressed to.
//!
//! * Request    the method name. An envelope is a request exactly when this
//!              is non-empty; otherwise it is a reply.
//!
//! * Error,     set on a reply when the call failed, in which case there is
//!   ErrorCode  no Response.
//!
//! Over a WebSocket each envelope travels in its own text frame. Over a byte
//! stream envelopes are written back to back, each followed by a newline.
//!
//! Replies may arrive in any order. Inbound requests are served
//! concurrently, and every request receives exactly one reply.

#![allow(missing_docs)]

pub mod client;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod jsoncodec;
pub mod protocol;
pub mod server;
pub mod state;
pub mod transport;

pub use crate::client::Conn;
pub use crate::config::Config;
pub use crate::error::{Error, RequestError};
pub use crate::header::{classify, Header, Kind};
pub use crate::jsoncodec::{JsonBody, JsonCodec};
pub use crate::server::Server;
