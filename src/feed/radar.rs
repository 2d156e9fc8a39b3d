use serde::Serialize;
use tokio::time::{Duration, Instant};

/// What the sweep timer publishes: the current angle and whether an
/// admission pulse is still showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RadarFrame {
    pub angle: u16,
    pub pulse: bool,
}

/// Cosmetic radar sweep. Nothing here feeds back into the buffer.
#[derive(Debug, Clone)]
pub struct RadarSweep {
    angle: u16,
    step: u16,
    pulse_for: Duration,
    pulse_until: Option<Instant>,
}

impl RadarSweep {
    pub fn new(step_deg: u16, pulse_for: Duration) -> Self {
        Self {
            angle: 0,
            step: step_deg % 360,
            pulse_for,
            pulse_until: None,
        }
    }

    pub fn advance(&mut self) -> u16 {
        self.angle = (self.angle + self.step) % 360;
        self.angle
    }

    pub fn pulse(&mut self, now: Instant) {
        self.pulse_until = Some(now + self.pulse_for);
    }

    pub fn frame(&self, now: Instant) -> RadarFrame {
        RadarFrame {
            angle: self.angle,
            pulse: self.pulse_until.map_or(false, |until| now < until),
        }
    }
}
