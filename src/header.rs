// Copyright 2020 Joyent, Inc.

//! Envelope header: the routing and correlation metadata carried by every
//! message.

use crate::error::RequestError;

/// The kind of an envelope. This is never sent on the wire; it is derived
/// from which header fields are set (see [`classify`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A call to a method on a facade.
    Request,
    /// A successful reply carrying a `Response` body.
    Response,
    /// A reply carrying `Error`/`ErrorCode` and no body.
    ErrorReply,
}

/// Routing and correlation fields of one envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Correlation id chosen by the originator of a call. Zero is reserved
    /// and marks a notification, for which no reply is sent.
    pub request_id: u64,
    /// Facade type the request is addressed to (`Type` on the wire).
    pub facade: String,
    /// Facade instance the request is addressed to (`Id` on the wire).
    pub id: String,
    /// Method name. Non-empty only on requests.
    pub request: String,
    /// Failure message. Non-empty only on error replies.
    pub error: String,
    /// Failure classification accompanying `error`.
    pub error_code: String,
}

/// Derive the envelope kind from its header. An envelope with a non-empty
/// `request` is a request; otherwise it is a reply, and a non-empty `error`
/// makes it an error reply.
pub fn classify(header: &Header) -> Kind {
    if !header.request.is_empty() {
        Kind::Request
    } else if !header.error.is_empty() {
        Kind::ErrorReply
    } else {
        Kind::Response
    }
}

impl Header {
    pub fn request(
        request_id: u64,
        facade: &str,
        id: &str,
        request: &str,
    ) -> Header {
        Header {
            request_id,
            facade: facade.to_string(),
            id: id.to_string(),
            request: request.to_string(),
            ..Header::default()
        }
    }

    pub fn reply(request_id: u64) -> Header {
        Header {
            request_id,
            ..Header::default()
        }
    }

    /// An error reply for `err`. An empty message is replaced so the
    /// envelope still classifies as an error reply.
    pub fn error_reply(request_id: u64, err: &RequestError) -> Header {
        let error = if err.message.is_empty() {
            "unspecified error".to_string()
        } else {
            err.message.clone()
        };
        Header {
            request_id,
            error,
            error_code: err.code.clone(),
            ..Header::default()
        }
    }

    pub fn kind(&self) -> Kind {
        classify(self)
    }

    pub fn is_request(&self) -> bool {
        self.kind() == Kind::Request
    }

    /// The application error carried by an error reply, if any.
    pub fn request_error(&self) -> Option<RequestError> {
        match self.kind() {
            Kind::ErrorReply => Some(RequestError {
                message: self.error.clone(),
                code: self.error_code.clone(),
            }),
            _ => None,
        }
    }
}
