// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::sync::Arc;

use slog::{o, Drain, Logger};
use slog_stdlog::StdLog;

use crate::diagnostics::{DiagnosticSink, LogSink, NoopSink};

/// Largest envelope accepted from a byte-stream transport by default.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Settings shared by the codec, the byte-stream transport and the
/// connection.
#[derive(Clone)]
pub struct Config {
    pub log: Logger,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub max_frame_len: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(None)
    }
}

impl Config {
    /// Uses `log` if given, otherwise forwards to the `log` crate.
    pub fn new(log: Option<&Logger>) -> Config {
        let log = log
            .cloned()
            .unwrap_or_else(|| Logger::root(StdLog.fuse(), o!()));
        Config {
            log,
            diagnostics: Arc::new(NoopSink),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Mirror every raw envelope to the logger at debug level.
    pub fn with_message_logging(mut self, enabled: bool) -> Config {
        self.diagnostics = if enabled {
            Arc::new(LogSink::new(self.log.new(o!("component" => "rpc/json"))))
        } else {
            Arc::new(NoopSink)
        };
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Config {
        self.diagnostics = sink;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Config {
        self.max_frame_len = max_frame_len;
        self
    }
}
