//! Frame processing stages that sit upstream of the muxer.
//!
//! Only timing matters here: a stage that changes playback speed must
//! report the stream duration it produces, so that encoders and muxers
//! downstream declare the right length.

use crate::speed::{duration_after_speed_provider_applied, output_time_us, SpeedProvider};
use std::fmt;
use std::sync::Arc;

/// A stage applied to video frames before encoding.
pub trait VideoEffect: Send + Sync {
    /// Whether the stage leaves frames of the given size untouched.
    fn is_no_op(&self, width: u32, height: u32) -> bool;

    /// Duration of a stream of `duration_us` after the stage is applied.
    fn duration_after_effect_applied(&self, duration_us: i64) -> i64 {
        duration_us
    }
}

/// Remaps frame timestamps through a speed curve without touching pixels.
#[derive(Clone)]
pub struct TimestampAdjustment {
    speed_provider: Arc<dyn SpeedProvider + Send + Sync>,
}

impl TimestampAdjustment {
    /// Create a stage driven by `speed_provider`.
    pub fn new(speed_provider: Arc<dyn SpeedProvider + Send + Sync>) -> Self {
        Self { speed_provider }
    }

    /// The speed curve this stage applies.
    pub fn speed_provider(&self) -> &(dyn SpeedProvider + Send + Sync) {
        self.speed_provider.as_ref()
    }

    /// Output timestamp for a frame presented at `input_time_us`.
    pub fn adjust_timestamp_us(&self, input_time_us: i64) -> i64 {
        output_time_us(self.speed_provider.as_ref(), input_time_us)
    }
}

impl VideoEffect for TimestampAdjustment {
    fn is_no_op(&self, _width: u32, _height: u32) -> bool {
        // Pixels are never modified.
        true
    }

    fn duration_after_effect_applied(&self, duration_us: i64) -> i64 {
        duration_after_speed_provider_applied(self.speed_provider.as_ref(), duration_us)
    }
}

impl fmt::Debug for TimestampAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampAdjustment").finish_non_exhaustive()
    }
}
