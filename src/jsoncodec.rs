// Copyright 2020 Joyent, Inc.

//! JSON realization of the codec contract.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use slog::{o, trace, Logger};

use crate::codec::{Codec, RawBody, ReadCodec, WriteCodec};
use crate::config::Config;
use crate::diagnostics::{DiagnosticSink, Direction};
use crate::error::Error;
use crate::header::Header;
use crate::protocol::{InMsg, OutMsg};
use crate::transport::{MessageReceiver, MessageSender, Transport};

/// A message body captured as undecoded JSON.
#[derive(Debug, Default)]
pub struct JsonBody(Option<Box<RawValue>>);

impl JsonBody {
    pub fn new(raw: Option<Box<RawValue>>) -> JsonBody {
        JsonBody(raw)
    }

    /// The raw JSON text, if a body was present.
    pub fn get(&self) -> Option<&str> {
        self.0.as_ref().map(|raw| raw.get())
    }
}

impl RawBody for JsonBody {
    fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    fn decode<T: DeserializeOwned + Default>(&self) -> Result<T, Error> {
        match &self.0 {
            Some(raw) => serde_json::from_str(raw.get()).map_err(Error::decode),
            None => Ok(T::default()),
        }
    }
}

/// Encodes envelopes as JSON objects over any [`Transport`].
pub struct JsonCodec<T: Transport> {
    transport: T,
    diagnostics: Arc<dyn DiagnosticSink>,
    log: Logger,
}

impl<T: Transport> JsonCodec<T> {
    pub fn new(transport: T, config: &Config) -> JsonCodec<T> {
        JsonCodec {
            transport,
            diagnostics: Arc::clone(&config.diagnostics),
            log: config.log.new(o!("component" => "jsoncodec")),
        }
    }
}

impl<T: Transport> Codec for JsonCodec<T> {
    type Reader = JsonReader<T::Receiver>;
    type Writer = JsonWriter<T::Sender>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (tx, rx) = self.transport.split();
        let reader = JsonReader {
            rx,
            msg: InMsg::default(),
            diagnostics: Arc::clone(&self.diagnostics),
            log: self.log.clone(),
        };
        let writer = JsonWriter {
            tx,
            closed: false,
            diagnostics: self.diagnostics,
            log: self.log,
        };
        (reader, writer)
    }
}

fn mirror(sink: &dyn DiagnosticSink, log: &Logger, direction: Direction, raw: &[u8]) {
    if let Err(e) = sink.record(direction, raw) {
        trace!(log, "diagnostic sink failed"; "err" => %e);
    }
}

pub struct JsonReader<R> {
    rx: R,
    // The envelope most recently returned by read_header.
    msg: InMsg,
    diagnostics: Arc<dyn DiagnosticSink>,
    log: Logger,
}

impl<R: MessageReceiver> ReadCodec for JsonReader<R> {
    type Body = JsonBody;

    async fn read_header(&mut self) -> Result<Option<Header>, Error> {
        self.msg = InMsg::default();
        let raw = match self.rx.receive().await.map_err(Error::transport)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        mirror(&*self.diagnostics, &self.log, Direction::Inbound, &raw);
        self.msg = serde_json::from_slice(&raw).map_err(Error::decode)?;
        Ok(Some(self.msg.header()))
    }

    fn read_body(&mut self, is_request: bool) -> Result<JsonBody, Error> {
        let raw = if is_request {
            self.msg.params.take()
        } else {
            self.msg.response.take()
        };
        Ok(JsonBody(raw))
    }
}

pub struct JsonWriter<S> {
    tx: S,
    closed: bool,
    diagnostics: Arc<dyn DiagnosticSink>,
    log: Logger,
}

impl<S: MessageSender> WriteCodec for JsonWriter<S> {
    async fn write_message<B>(&mut self, header: &Header, body: Option<&B>) -> Result<(), Error>
    where
        B: Serialize + Sync + ?Sized,
    {
        let data = serde_json::to_vec(&OutMsg::new(header, body)).map_err(Error::encode)?;
        mirror(&*self.diagnostics, &self.log, Direction::Outbound, &data);
        self.tx.send(Bytes::from(data)).await.map_err(Error::transport)
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tx.close().await.map_err(Error::transport)
    }
}
