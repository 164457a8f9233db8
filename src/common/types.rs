use std::{
    fmt,
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Number of 100 ns ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Media timestamp in 100 ns ticks.
///
/// All presentation/decode timestamps and durations in the pipeline use this
/// unit so that sample-accurate arithmetic never accumulates rounding drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Convert a 90 kHz MPEG clock value into ticks.
    pub const fn from_90khz(value: u64) -> Self {
        Self((value * 1_000 / 9) as i64)
    }

    /// Position of `samples` at `sample_rate`, rounded down to the tick.
    pub fn from_samples(samples: u64, sample_rate: u32) -> Self {
        if sample_rate == 0 {
            return Self::ZERO;
        }
        let ticks = (samples as u128 * TICKS_PER_SECOND as u128) / sample_rate as u128;
        Self(ticks as i64)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * TICKS_PER_SECOND as f64).round() as i64)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    pub fn as_duration(self) -> Duration {
        if self.0 <= 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.0 as u64 * 100)
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self((d.as_nanos() / 100) as i64)
    }
}

impl Add for Timestamp {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Timestamp {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}
