use crate::ranging::RangingOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_OCCUPANCY_THRESHOLD_CM: f32 = 20.0;

/// Bay state as reported to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupancyStatus {
    Occupied,
    Free,
}

impl fmt::Display for OccupancyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OccupancyStatus::Occupied => f.write_str("Occupied"),
            OccupancyStatus::Free => f.write_str("Free"),
        }
    }
}

/// Strict threshold comparison. No hysteresis: readings hovering around the
/// threshold flip the status from one cycle to the next.
pub fn classify(distance_cm: f32, threshold_cm: f32) -> OccupancyStatus {
    if distance_cm < threshold_cm {
        OccupancyStatus::Occupied
    } else {
        OccupancyStatus::Free
    }
}

/// A missing echo means nothing is in range.
pub fn classify_outcome(outcome: &RangingOutcome, threshold_cm: f32) -> OccupancyStatus {
    match outcome {
        RangingOutcome::Distance(sample) => classify(sample.distance_cm, threshold_cm),
        RangingOutcome::Timeout => OccupancyStatus::Free,
    }
}
