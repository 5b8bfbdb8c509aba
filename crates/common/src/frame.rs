use serde::{Deserialize, Serialize};

/// Frame number plus reference time (seconds) of one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStamp {
    pub frame_number: u64,
    pub reference_time: f64,
}

impl FrameStamp {
    pub fn new(frame_number: u64, reference_time: f64) -> Self {
        Self {
            frame_number,
            reference_time,
        }
    }

    /// The stamp of the following frame, `dt` seconds later.
    pub fn next(&self, dt: f64) -> Self {
        Self {
            frame_number: self.frame_number + 1,
            reference_time: self.reference_time + dt,
        }
    }
}
