//! Campaign clock: owns tick count, elapsed simulated time and pause.

use crate::types::Tick;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub current_tick: Tick,
    /// Simulated seconds accumulated from host `dt` values.
    pub elapsed_secs: f64,
    pub paused: bool,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            current_tick: 0,
            elapsed_secs: 0.0,
            paused: false,
        }
    }

    /// Advance one tick by `dt` seconds. Returns the new tick number.
    /// Panics if called while paused; callers must check.
    pub fn advance(&mut self, dt: f64) -> Tick {
        assert!(!self.paused, "advance() called on paused clock");
        self.current_tick += 1;
        self.elapsed_secs += dt;
        self.current_tick
    }

    pub fn pause(&mut self)  { self.paused = true;  }
    pub fn resume(&mut self) { self.paused = false; }
}

impl Default for SimClock {
    fn default() -> Self { Self::new() }
}
