/// Fixed-step frame counter. Script time only advances when the scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    frame_time: f64,
    frame: u64,
}

impl FrameClock {
    pub fn new(frame_time: f64) -> Self {
        Self { frame_time, frame: 0 }
    }

    pub fn tick(&mut self) {
        self.frame += 1;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn frame_time(&self) -> f64 {
        self.frame_time
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.frame as f64 * self.frame_time
    }

    /// Whole frames needed to cover `seconds`. Values a hair over a frame boundary round down to it.
    pub fn frames_for(&self, seconds: f64) -> u64 {
        if seconds <= 0.0 || !seconds.is_finite() {
            return if seconds == f64::INFINITY { u64::MAX } else { 0 };
        }
        (seconds / self.frame_time - 1e-6).ceil() as u64
    }
}
