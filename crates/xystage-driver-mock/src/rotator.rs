//! Simulated wave-plate rotator board.

use crate::port::{Framing, MockDevice};

/// Single-axis stepper with an index switch.
///
/// The switch closes when the shaft enters `index_lo..=index_hi` and only
/// re-opens once the shaft leaves that window widened by `hysteresis` on both
/// sides, like a real optical flag with a finite edge.
#[derive(Debug, Clone)]
pub struct RotatorSim {
    /// Board step counter. Never reset by the board itself.
    pub steps: i64,
    /// First counter value inside the index window.
    pub index_lo: i64,
    /// Last counter value inside the index window.
    pub index_hi: i64,
    /// Extra steps the switch stays closed past the window.
    pub hysteresis: i64,
    /// Wrap the switch window every revolution when set.
    pub steps_per_rev: Option<i64>,
    /// Stop answering entirely.
    pub silent: bool,
    switch: bool,
}

impl Default for RotatorSim {
    fn default() -> Self {
        Self::at(0)
    }
}

impl RotatorSim {
    /// Rotator starting at `steps` with the index window at `0..=2`.
    pub fn at(steps: i64) -> Self {
        let mut sim = Self {
            steps,
            index_lo: 0,
            index_hi: 2,
            hysteresis: 0,
            steps_per_rev: None,
            silent: false,
            switch: false,
        };
        sim.switch = sim.in_window(0);
        sim
    }

    /// Move the index window (and re-evaluate the switch).
    pub fn with_index(mut self, lo: i64, hi: i64, hysteresis: i64) -> Self {
        self.index_lo = lo;
        self.index_hi = hi;
        self.hysteresis = hysteresis;
        self.switch = self.in_window(0);
        self
    }

    /// Current switch level.
    pub fn index_switch(&self) -> bool {
        self.switch
    }

    fn shaft_position(&self) -> i64 {
        match self.steps_per_rev {
            Some(rev) if rev > 0 => self.steps.rem_euclid(rev),
            _ => self.steps,
        }
    }

    fn in_window(&self, margin: i64) -> bool {
        let pos = self.shaft_position();
        (self.index_lo - margin..=self.index_hi + margin).contains(&pos)
    }

    fn step(&mut self, delta: i64) {
        self.steps += delta;
        self.switch = if self.switch {
            self.in_window(self.hysteresis)
        } else {
            self.in_window(0)
        };
    }

    fn report(&self, tag: &str) -> String {
        format!("{}:{} {}\n", tag, self.steps, u8::from(self.switch))
    }
}

impl MockDevice for RotatorSim {
    fn framing(&self) -> Framing {
        Framing::Byte
    }

    fn respond(&mut self, request: &str) -> String {
        if self.silent {
            return String::new();
        }
        match request {
            "r" => self.report("status"),
            "a" => {
                self.step(1);
                self.report("step")
            }
            "b" => {
                self.step(-1);
                self.report("step")
            }
            _ => "?\n".to_string(),
        }
    }
}
