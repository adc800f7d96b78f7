// Copyright 2020 Joyent, Inc.

//! Optional mirroring of raw envelopes for debugging.

use std::fmt;
use std::io;

use slog::{debug, Logger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "<-"),
            Direction::Outbound => write!(f, "->"),
        }
    }
}

/// Receives a copy of every raw envelope a codec reads or writes. Errors
/// are ignored by the codec.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, direction: Direction, raw: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn record(&self, _direction: Direction, _raw: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each envelope as a debug log line.
#[derive(Clone)]
pub struct LogSink {
    log: Logger,
}

impl LogSink {
    pub fn new(log: Logger) -> LogSink {
        LogSink { log }
    }
}

impl DiagnosticSink for LogSink {
    fn record(&self, direction: Direction, raw: &[u8]) -> io::Result<()> {
        debug!(self.log, "rpc/json: {} {}", direction, String::from_utf8_lossy(raw));
        Ok(())
    }
}
