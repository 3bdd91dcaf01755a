//! Playback speed curves and their effect on stream timing.

use crate::error::{Error, Result};

/// A piecewise-constant playback speed over input time.
pub trait SpeedProvider {
    /// Speed at the given input time. Must be positive.
    fn speed(&self, time_us: i64) -> f32;

    /// First input time strictly after `time_us` at which the speed changes,
    /// or `None` if it stays constant from there on.
    fn next_speed_change_time_us(&self, time_us: i64) -> Option<i64>;
}

/// The same speed for the whole stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantSpeedProvider {
    speed: f32,
}

impl ConstantSpeedProvider {
    /// Create a provider with the given speed.
    pub fn new(speed: f32) -> Result<Self> {
        validate_speed(speed)?;
        Ok(Self { speed })
    }
}

impl SpeedProvider for ConstantSpeedProvider {
    fn speed(&self, _time_us: i64) -> f32 {
        self.speed
    }

    fn next_speed_change_time_us(&self, _time_us: i64) -> Option<i64> {
        None
    }
}

/// Speeds that apply from given input start times onwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSpeedProvider {
    start_times_us: Vec<i64>,
    speeds: Vec<f32>,
}

impl SegmentSpeedProvider {
    /// Create a provider where `speeds[i]` applies from `start_times_us[i]`
    /// until the next start time.
    ///
    /// The first start time must be zero and start times must be strictly
    /// increasing.
    pub fn new(start_times_us: Vec<i64>, speeds: Vec<f32>) -> Result<Self> {
        if start_times_us.is_empty() || start_times_us.len() != speeds.len() {
            return Err(Error::invalid_param(
                "start times and speeds must be non-empty and the same length",
            ));
        }
        if start_times_us[0] != 0 {
            return Err(Error::invalid_param("first speed segment must start at 0"));
        }
        if start_times_us.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::invalid_param("start times must be strictly increasing"));
        }
        for &speed in &speeds {
            validate_speed(speed)?;
        }
        Ok(Self {
            start_times_us,
            speeds,
        })
    }

    fn segment_index(&self, time_us: i64) -> usize {
        // Number of segments starting at or before `time_us`, minus one.
        self.start_times_us
            .partition_point(|&start| start <= time_us)
            .saturating_sub(1)
    }
}

impl SpeedProvider for SegmentSpeedProvider {
    fn speed(&self, time_us: i64) -> f32 {
        self.speeds[self.segment_index(time_us)]
    }

    fn next_speed_change_time_us(&self, time_us: i64) -> Option<i64> {
        let next = self.start_times_us.partition_point(|&start| start <= time_us);
        self.start_times_us.get(next).copied()
    }
}

fn validate_speed(speed: f32) -> Result<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid_param(format!("speed must be positive, got {}", speed)))
    }
}

/// Output time, in fractional microseconds, of an input time after the
/// speed curve is applied.
fn integrate(provider: &dyn SpeedProvider, input_time_us: i64) -> f64 {
    let mut segment_start_us = 0i64;
    let mut output_us = 0.0f64;
    while segment_start_us < input_time_us {
        let segment_end_us = provider
            .next_speed_change_time_us(segment_start_us)
            .filter(|&t| t > segment_start_us)
            .unwrap_or(i64::MAX);
        let end = segment_end_us.min(input_time_us);
        output_us += (end - segment_start_us) as f64 / f64::from(provider.speed(segment_start_us));
        segment_start_us = segment_end_us;
    }
    output_us
}

/// Duration of a stream of `duration_us` once `provider` is applied,
/// rounded up to whole microseconds.
pub fn duration_after_speed_provider_applied(provider: &dyn SpeedProvider, duration_us: i64) -> i64 {
    if duration_us <= 0 {
        return duration_us.max(0);
    }
    integrate(provider, duration_us).ceil() as i64
}

/// Remap a single input timestamp through `provider`, rounded to the
/// nearest microsecond. Negative timestamps pass through unchanged.
pub fn output_time_us(provider: &dyn SpeedProvider, input_time_us: i64) -> i64 {
    if input_time_us <= 0 {
        return input_time_us;
    }
    integrate(provider, input_time_us).round() as i64
}
