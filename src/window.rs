// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Recording window boundaries and per-message classification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::message::{Message, Timestamp};

/// One end of a recording window, either a pulse id or an epoch timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    PulseId(u64),
    Timestamp(f64),
}

impl Boundary {
    pub fn now() -> Self {
        Boundary::Timestamp(Timestamp::now().as_f64())
    }

    /// Boundary lies strictly ahead of `position`, which has not reached it yet
    pub fn is_ahead_of(&self, position: &Position) -> bool {
        match *self {
            Boundary::PulseId(pulse_id) => position.pulse_id < pulse_id,
            Boundary::Timestamp(ts) => position.timestamp < ts,
        }
    }

    /// Boundary lies strictly behind `position`, which has gone past it
    pub fn is_behind(&self, position: &Position) -> bool {
        match *self {
            Boundary::PulseId(pulse_id) => position.pulse_id > pulse_id,
            Boundary::Timestamp(ts) => position.timestamp > ts,
        }
    }

    /// Position has reached this boundary (inclusive)
    pub fn is_reached_by(&self, position: &Position) -> bool {
        !self.is_ahead_of(position)
    }

    pub fn pulse_id(&self) -> Option<u64> {
        match *self {
            Boundary::PulseId(pulse_id) => Some(pulse_id),
            Boundary::Timestamp(_) => None,
        }
    }

    pub fn timestamp(&self) -> Option<f64> {
        match *self {
            Boundary::PulseId(_) => None,
            Boundary::Timestamp(ts) => Some(ts),
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::PulseId(pulse_id) => write!(f, "pulse_id {}", pulse_id),
            Boundary::Timestamp(ts) => write!(f, "timestamp {:.6}", ts),
        }
    }
}

/// Stream position of one message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub pulse_id: u64,
    pub timestamp: f64,
}

impl Position {
    pub fn of(message: &Message) -> Self {
        Self {
            pulse_id: message.pulse_id,
            timestamp: message.timestamp.as_f64(),
        }
    }
}

/// Outcome of classifying one message against the active window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    TooEarly,
    InWindow,
    TooLate,
}

/// Inclusive recording window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Window {
    pub start: Option<Boundary>,
    pub stop: Option<Boundary>,
}

impl Window {
    pub fn new(start: Option<Boundary>) -> Self {
        Self { start, stop: None }
    }

    /// Too-early is checked before too-late.
    pub fn classify(&self, position: &Position) -> Classification {
        if let Some(start) = &self.start {
            if start.is_ahead_of(position) {
                return Classification::TooEarly;
            }
        }

        if let Some(stop) = &self.stop {
            if stop.is_behind(position) {
                return Classification::TooLate;
            }
        }

        Classification::InWindow
    }

    /// Evaluated when the stream delivered nothing within the receive timeout.
    ///
    /// A pulse-id stop fires once the last observed pulse reached it, since
    /// pulse ids only grow. A timestamp stop also fires once wall-clock time
    /// has moved past it by more than one receive timeout.
    pub fn should_stop_idle(
        &self,
        last_observed: Option<&Position>,
        now: f64,
        receive_timeout: Duration,
    ) -> bool {
        let Some(stop) = &self.stop else {
            return false;
        };

        if let Some(position) = last_observed {
            if stop.is_reached_by(position) {
                return true;
            }
        }

        match stop {
            Boundary::Timestamp(ts) => now - ts > receive_timeout.as_secs_f64(),
            Boundary::PulseId(_) => false,
        }
    }
}
