// Copyright 2020 Joyent, Inc.

//! The call multiplexer.
//!
//! A [`Conn`] owns one codec. Outgoing calls are given a fresh request id and
//! parked in a table until the matching reply arrives. A single read loop
//! decodes every inbound header in order: replies complete the parked call
//! with the same id, requests are handed to the [`Server`] and run
//! concurrently. Writes from callers and from handlers share one lock so
//! envelopes never interleave.
//!
//! Every call resolves exactly once. When the connection ends, calls still
//! parked are failed with [`Error::Shutdown`] after a deliberate
//! [`Conn::close`], or with [`Error::ConnectionLost`] otherwise.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use slog::{debug, o, trace, warn, Logger};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::codec::{BodyOf, Codec, RawBody, ReadCodec, WriteCodec};
use crate::config::Config;
use crate::error::{Error, RequestError};
use crate::header::{Header, Kind};
use crate::server::Server;
use crate::state::{ConnState, Phase};

type Slot<B> = oneshot::Sender<Result<B, Error>>;

struct Pending<B> {
    calls: HashMap<u64, Slot<B>>,
    last_id: u64,
    // Set when the read loop exits. Nothing may be parked after that.
    ended: Option<Error>,
}

impl<B> Pending<B> {
    fn next_id(&mut self) -> u64 {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id != 0 && !self.calls.contains_key(&self.last_id) {
                return self.last_id;
            }
        }
    }
}

struct Inner<C: Codec> {
    writer: AsyncMutex<C::Writer>,
    pending: Mutex<Pending<BodyOf<C>>>,
    state: ConnState,
    server: Option<Server<BodyOf<C>>>,
    handlers: TaskTracker,
    shutdown: CancellationToken,
    dead: watch::Sender<Option<Result<(), Error>>>,
    unknown_replies: AtomicU64,
    log: Logger,
}

/// A multiplexed RPC connection. Cloning is cheap; all clones share the
/// same connection.
pub struct Conn<C: Codec> {
    inner: Arc<Inner<C>>,
}

impl<C: Codec> Clone for Conn<C> {
    fn clone(&self) -> Self {
        Conn {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> Conn<C> {
    /// Start serving `codec`. Inbound requests go to `server`; without one
    /// every request is answered with a "not implemented" error. Must be
    /// called from within a tokio runtime.
    pub fn start(codec: C, server: Option<Server<BodyOf<C>>>, config: &Config) -> Conn<C> {
        let (reader, writer) = codec.split();
        let (dead, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            writer: AsyncMutex::new(writer),
            pending: Mutex::new(Pending {
                calls: HashMap::new(),
                last_id: 0,
                ended: None,
            }),
            state: ConnState::new(),
            server,
            handlers: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            dead,
            unknown_replies: AtomicU64::new(0),
            log: config.log.new(o!("component" => "conn")),
        });
        tokio::spawn(read_loop(Arc::clone(&inner), reader));
        Conn { inner }
    }

    /// Call `request` on the facade instance `(facade, id)` and wait for the
    /// reply. Dropping the returned future abandons the call; a reply that
    /// arrives later is discarded.
    pub async fn call<P, R>(
        &self,
        facade: &str,
        id: &str,
        request: &str,
        params: &P,
    ) -> Result<R, Error>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Default,
    {
        if request.is_empty() {
            return Err(RequestError::bad_request("empty request name").into());
        }
        let (tx, rx) = oneshot::channel();
        let request_id = self.inner.register(tx)?;
        let mut unsent = Unsent {
            inner: &*self.inner,
            request_id,
            armed: true,
        };
        let hdr = Header::request(request_id, facade, id, request);
        trace!(self.inner.log, "sending request";
            "request_id" => request_id, "type" => facade, "request" => request);

        if let Err(e) = self.inner.write(&hdr, Some(params)).await {
            debug!(self.inner.log, "cannot send request";
                "request_id" => request_id, "err" => %e);
            return Err(e);
        }
        unsent.armed = false;

        match rx.await {
            Ok(Ok(body)) => body.decode(),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Shutdown),
        }
    }

    /// Send `request` without waiting for, or expecting, a reply.
    pub async fn notify<P>(&self, facade: &str, id: &str, request: &str, params: &P) -> Result<(), Error>
    where
        P: Serialize + Sync + ?Sized,
    {
        if request.is_empty() {
            return Err(RequestError::bad_request("empty request name").into());
        }
        self.inner.check_usable()?;
        let hdr = Header::request(0, facade, id, request);
        self.inner.write(&hdr, Some(params)).await
    }

    /// Close the connection. Outstanding calls fail with
    /// [`Error::Shutdown`]. Returns once the read loop has exited and every
    /// inbound request already being handled has finished, so it must not
    /// be called from inside a handler.
    pub async fn close(&self) -> Result<(), Error> {
        if !self.inner.state.transition(Phase::Closing) {
            let _ = self.dead().await;
            return Ok(());
        }
        debug!(self.inner.log, "closing connection");
        self.inner.shutdown.cancel();
        let closed = self.inner.writer.lock().await.close().await;
        let _ = self.dead().await;
        self.inner.handlers.close();
        self.inner.handlers.wait().await;
        self.inner.state.transition(Phase::Closed);
        closed
    }

    /// Wait for the connection to end. Returns `Ok(())` if it was closed
    /// with [`Conn::close`] and the error that ended it otherwise.
    pub async fn dead(&self) -> Result<(), Error> {
        let mut rx = self.inner.dead.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(Error::Shutdown);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.state.is_open()
    }

    /// Number of calls registered and not yet resolved.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().calls.len()
    }

    /// Number of replies dropped because no call was waiting for their
    /// request id.
    pub fn unknown_replies(&self) -> u64 {
        self.inner.unknown_replies.load(Ordering::Relaxed)
    }
}

impl<C: Codec> Inner<C> {
    fn check_usable(&self) -> Result<(), Error> {
        if let Some(err) = &self.pending.lock().ended {
            return Err(err.clone());
        }
        if !self.state.is_open() {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    fn register(&self, slot: Slot<BodyOf<C>>) -> Result<u64, Error> {
        let mut pending = self.pending.lock();
        if let Some(err) = &pending.ended {
            return Err(err.clone());
        }
        if !self.state.is_open() {
            return Err(Error::Shutdown);
        }
        let request_id = pending.next_id();
        pending.calls.insert(request_id, slot);
        Ok(request_id)
    }

    /// Write one envelope. Gives up as soon as the connection starts
    /// shutting down, even if the transport is blocked mid-write.
    async fn write<B>(&self, header: &Header, body: Option<&B>) -> Result<(), Error>
    where
        B: Serialize + Sync + ?Sized,
    {
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_message(header, body).await
        };
        let written = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                Err(self.pending.lock().ended.clone().unwrap_or(Error::Shutdown))
            }
            written = write => written,
        };
        written.map_err(|e| match e {
            Error::Transport(_) => Error::connection_lost(e),
            other => other,
        })
    }

    fn handle_reply(&self, hdr: Header, reader: &mut C::Reader) {
        let slot = self.pending.lock().calls.remove(&hdr.request_id);
        let slot = match slot {
            Some(slot) => slot,
            None => {
                self.unknown_replies.fetch_add(1, Ordering::Relaxed);
                warn!(self.log, "dropping reply";
                    "err" => %Error::UnknownRequestId(hdr.request_id));
                return;
            }
        };
        let result = match hdr.request_error() {
            Some(err) => Err(Error::Request(err)),
            None => reader.read_body(false),
        };
        // The caller may have abandoned the call.
        let _ = slot.send(result);
    }

    fn handle_request(self: &Arc<Self>, hdr: Header, reader: &mut C::Reader) {
        let body = reader.read_body(true);
        let inner = Arc::clone(self);
        self.handlers.spawn(async move {
            trace!(inner.log, "serving request";
                "request_id" => hdr.request_id, "type" => &hdr.facade,
                "id" => &hdr.id, "request" => &hdr.request);
            let outcome = match (body, inner.server.as_ref()) {
                (Err(e), _) => Err(RequestError::bad_request(e.to_string())),
                (Ok(_), None) => Err(RequestError::not_implemented(format!(
                    "no service available for {}.{}",
                    hdr.facade, hdr.request
                ))),
                (Ok(body), Some(server)) => server.dispatch(&hdr, body).await,
            };
            inner.reply(&hdr, outcome).await;
        });
    }

    async fn reply(&self, hdr: &Header, outcome: Result<Value, RequestError>) {
        if hdr.request_id == 0 {
            if let Err(e) = outcome {
                debug!(self.log, "notification failed";
                    "type" => &hdr.facade, "request" => &hdr.request, "err" => %e);
            }
            return;
        }
        let written = match outcome {
            Ok(response) => self.write(&Header::reply(hdr.request_id), Some(&response)).await,
            Err(err) => {
                self.write::<Value>(&Header::error_reply(hdr.request_id, &err), None)
                    .await
            }
        };
        if let Err(e) = written {
            debug!(self.log, "cannot write reply";
                "request_id" => hdr.request_id, "err" => %e);
        }
    }

    /// Resolve every parked call and publish how the connection ended.
    async fn terminate(&self, outcome: Result<(), Error>) {
        let abort = match &outcome {
            Ok(()) => Error::Shutdown,
            Err(e) => e.clone(),
        };
        let calls = {
            let mut pending = self.pending.lock();
            pending.ended = Some(abort.clone());
            std::mem::take(&mut pending.calls)
        };
        if !calls.is_empty() {
            debug!(self.log, "aborting outstanding calls";
                "count" => calls.len(), "err" => %abort);
        }
        for (_, slot) in calls {
            let _ = slot.send(Err(abort.clone()));
        }

        if let Err(e) = &outcome {
            warn!(self.log, "connection failed"; "err" => %e);
            self.state.transition(Phase::Closed);
            // Release any writer blocked on the dead transport.
            self.shutdown.cancel();
            if let Err(e) = self.writer.lock().await.close().await {
                debug!(self.log, "cannot close transport"; "err" => %e);
            }
        }
        self.dead.send_replace(Some(outcome));
    }
}

/// Withdraws a registered call whose request was never fully written, so
/// the slot does not linger when the caller gives up early.
struct Unsent<'a, C: Codec> {
    inner: &'a Inner<C>,
    request_id: u64,
    armed: bool,
}

impl<C: Codec> Drop for Unsent<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.pending.lock().calls.remove(&self.request_id);
        }
    }
}

async fn read_loop<C: Codec>(inner: Arc<Inner<C>>, mut reader: C::Reader) {
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => Ok(None),
            next = reader.read_header() => next,
        };
        let hdr = match next {
            Ok(Some(hdr)) => hdr,
            Ok(None) if inner.state.expected_shutdown() => break Ok(()),
            Ok(None) => {
                break Err(Error::ConnectionLost(Arc::new(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))))
            }
            Err(e) if inner.state.expected_shutdown() => {
                debug!(inner.log, "ignoring error during shutdown"; "err" => %e);
                break Ok(());
            }
            Err(e) => break Err(Error::connection_lost(e)),
        };
        match hdr.kind() {
            Kind::Request => inner.handle_request(hdr, &mut reader),
            Kind::Response | Kind::ErrorReply => inner.handle_reply(hdr, &mut reader),
        }
    };
    inner.terminate(outcome).await;
}
