//! Host tick to tracking clock conversion

use serde::{Deserialize, Serialize};

/// Hundred-nanosecond units per second.
pub const HNS_BASE: i64 = 10_000_000;

/// Instant on the tracking subsystem's clock, in hundred-nanosecond units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackingTimestamp(pub i64);

/// Maps the frame producer's hardware tick counter onto the tracking clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostClock {
    /// Host counter ticks per second
    pub frequency: u64,
    /// Tracking time at host tick zero, in hundred-nanosecond units
    pub tracking_offset: i64,
}

impl HostClock {
    pub fn new(frequency: u64, tracking_offset: i64) -> Self {
        Self {
            frequency: frequency.max(1),
            tracking_offset,
        }
    }

    pub fn to_tracking(&self, host_ticks: u64) -> TrackingTimestamp {
        let hns = u128::from(host_ticks) * HNS_BASE as u128 / u128::from(self.frequency.max(1));
        let hns = i64::try_from(hns).unwrap_or(i64::MAX);
        TrackingTimestamp(hns.saturating_add(self.tracking_offset))
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new(HNS_BASE as u64, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_clock_passes_ticks_through() {
        let clock = HostClock::default();
        assert_eq!(clock.to_tracking(123_456), TrackingTimestamp(123_456));
    }

    #[test]
    fn converts_frequency_and_offset() {
        let clock = HostClock::new(1_000, 50);
        // 1.5 s of 1 kHz ticks
        assert_eq!(clock.to_tracking(1_500), TrackingTimestamp(15_000_050));
    }

    #[test]
    fn large_tick_counts_do_not_overflow() {
        let clock = HostClock::new(19_200_000, 0);
        let ticks = u64::MAX / 4;
        assert!(clock.to_tracking(ticks).0 > 0);
    }

    #[test]
    fn slow_clock_saturates_instead_of_wrapping() {
        let clock = HostClock::new(1_000, 0);
        assert_eq!(clock.to_tracking(u64::MAX), TrackingTimestamp(i64::MAX));

        let shifted = HostClock::new(1_000, 5_000);
        assert_eq!(shifted.to_tracking(u64::MAX), TrackingTimestamp(i64::MAX));
    }
}
