use std::{
    fmt::{self, Display},
    num::ParseIntError,
    ops::{Add, Div, Mul, Rem, Sub},
    str::FromStr,
    time::{Duration, SystemTime},
};

use datasize::DataSize;
use derive_more::{Add, AddAssign, From, Sub, SubAssign};
use serde::{Deserialize, Serialize};

/// A moment on the consensus logical clock, expressed as a number of ticks since the Unix epoch.
///
/// The length of one tick is fixed by configuration; see [`TickClock`].
#[derive(
    DataSize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash,
)]
pub struct Tick(u64);

/// A difference between two ticks.
#[derive(
    DataSize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    From,
    Serialize,
    Deserialize,
)]
pub struct TickDiff(u64);

impl Tick {
    /// Returns the zero tick.
    pub fn zero() -> Self {
        Tick(0)
    }

    /// Returns the tick as a plain number.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns the difference between `self` and `other`, or zero if `self` is earlier.
    pub fn saturating_sub(self, other: Tick) -> TickDiff {
        TickDiff(self.0.saturating_sub(other.0))
    }
}

impl TickDiff {
    /// Returns the difference as a plain number of ticks.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for TickDiff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

impl FromStr for Tick {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(Tick)
    }
}

impl Sub<Tick> for Tick {
    type Output = TickDiff;

    fn sub(self, other: Tick) -> TickDiff {
        TickDiff(self.0 - other.0)
    }
}

impl Add<TickDiff> for Tick {
    type Output = Tick;

    fn add(self, diff: TickDiff) -> Tick {
        Tick(self.0 + diff.0)
    }
}

impl Sub<TickDiff> for Tick {
    type Output = Tick;

    fn sub(self, diff: TickDiff) -> Tick {
        Tick(self.0 - diff.0)
    }
}

impl Div<TickDiff> for Tick {
    type Output = u64;

    fn div(self, rhs: TickDiff) -> u64 {
        self.0 / rhs.0
    }
}

impl Rem<TickDiff> for Tick {
    type Output = TickDiff;

    fn rem(self, diff: TickDiff) -> TickDiff {
        TickDiff(self.0 % diff.0)
    }
}

impl Mul<u64> for TickDiff {
    type Output = TickDiff;

    fn mul(self, rhs: u64) -> TickDiff {
        TickDiff(self.0 * rhs)
    }
}

impl Div<u64> for TickDiff {
    type Output = TickDiff;

    fn div(self, rhs: u64) -> TickDiff {
        TickDiff(self.0 / rhs)
    }
}

#[cfg(test)]
impl From<u64> for Tick {
    fn from(arg: u64) -> Tick {
        Tick(arg)
    }
}

/// Conversions between the system clock and the tick clock.
///
/// The clock is only required to be monotone enough for scheduling; small drift between nodes is
/// tolerated by the protocol's round schedule.
#[derive(DataSize, Debug, Clone, Copy)]
pub struct TickClock {
    unit: Duration,
}

impl TickClock {
    /// Creates a clock whose ticks are `unit` long.
    ///
    /// Panics if `unit` is shorter than one millisecond.
    pub fn new(unit: Duration) -> Self {
        assert!(
            unit >= Duration::from_millis(1),
            "tick unit must be at least one millisecond"
        );
        TickClock { unit }
    }

    /// Returns the current moment as a tick.
    pub fn now(&self) -> Tick {
        let elapsed = SystemTime::UNIX_EPOCH.elapsed().unwrap();
        Tick((elapsed.as_millis() / self.unit.as_millis()) as u64)
    }

    /// Converts a tick difference into wall-clock time.
    pub fn to_duration(&self, diff: TickDiff) -> Duration {
        self.unit
            .checked_mul(u32::try_from(diff.0).unwrap_or(u32::MAX))
            .unwrap_or(Duration::MAX)
    }

    /// Returns how long to wait from `now` until `tick`, clamped at zero for past ticks.
    pub fn delay_until(&self, now: Tick, tick: Tick) -> Duration {
        self.to_duration(tick.saturating_sub(now))
    }
}
