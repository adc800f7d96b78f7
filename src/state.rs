// Copyright 2020 Joyent, Inc.

//! Connection lifecycle. The phase only ever moves forward:
//! `Open -> Closing -> Closed`, or straight from `Open` to `Closed` when the
//! transport fails underneath us.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
pub struct ConnState {
    phase: Mutex<Phase>,
}

impl Default for ConnState {
    fn default() -> Self {
        ConnState::new()
    }
}

impl ConnState {
    pub fn new() -> ConnState {
        ConnState {
            phase: Mutex::new(Phase::Open),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Move to `to` if that is a forward step. Returns false when the
    /// connection is already at or past `to`.
    pub fn transition(&self, to: Phase) -> bool {
        let mut phase = self.phase.lock();
        if *phase < to {
            *phase = to;
            true
        } else {
            false
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    /// True once a deliberate close has begun. Transport errors observed
    /// from then on are shutdown noise rather than failures.
    pub fn expected_shutdown(&self) -> bool {
        !self.is_open()
    }
}
