//! Process-wide admission control for feed calls.
//!
//! The upstream operator publishes distinct calls-per-second ceilings for distinct
//! UTC windows, including a daily window during which access is suspended entirely.
//! [`RateGate`] enforces the active ceiling as a minimum spacing between the starts
//! of consecutive calls, tracked through a single shared last-call instant. The
//! gate is one injected instance per process, shared by reference across all
//! region loops; per-caller budgets would not satisfy the upstream limit.

use std::time::Duration;

use chrono::{Timelike, Utc};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::info;

use crate::config::RateScheduleConfig;

/// Poll interval while the feed is suspended (active ceiling of zero).
const SUSPENSION_POLL: Duration = Duration::from_millis(500);

/// Time-of-day rate schedule, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RateSchedule {
    /// `(threshold, calls per second)` entries ordered by ascending threshold,
    /// where a threshold is a UTC time encoded as `hour * 100 + minute`.
    windows: Vec<(u32, u32)>,
    override_calls_per_second: Option<u32>,
}

impl RateSchedule {
    pub fn from_config(config: &RateScheduleConfig) -> Self {
        Self {
            windows: config
                .windows
                .iter()
                .map(|w| (w.threshold, w.calls_per_second))
                .collect(),
            override_calls_per_second: config.override_calls_per_second,
        }
    }

    /// Returns the ceiling active at the given UTC time (`hour * 100 + minute`).
    ///
    /// Selects the last window whose threshold is `<=` the current time, starting
    /// from the first window as the day's default. A positive manual override takes
    /// precedence over the schedule.
    pub fn ceiling_at(&self, time_of_day: u32) -> u32 {
        if let Some(value) = self.override_calls_per_second
            && value > 0
        {
            return value;
        }

        let mut ceiling = self.windows.first().map(|(_, c)| *c).unwrap_or(0);
        for (threshold, calls_per_second) in &self.windows {
            if time_of_day >= *threshold {
                ceiling = *calls_per_second;
            }
        }

        ceiling
    }
}

#[derive(Debug)]
struct GateState {
    /// Start instant of the most recent admitted call.
    last_call: Option<Instant>,
    /// Ceiling computed for the current UTC minute, keyed by `hour * 100 + minute`.
    cached_ceiling: Option<(u32, u32)>,
}

/// Admission gate for calls to the external feed.
///
/// Acquirers serialize on an internal mutex, so the enforced spacing holds across
/// all concurrent region loops. The mutex is held across the spacing sleep on
/// purpose: the next caller must not sample the last-call instant before the
/// current caller has claimed its slot.
#[derive(Debug)]
pub struct RateGate {
    schedule: RateSchedule,
    state: Mutex<GateState>,
}

impl RateGate {
    pub fn new(schedule: RateSchedule) -> Self {
        Self {
            schedule,
            state: Mutex::new(GateState {
                last_call: None,
                cached_ceiling: None,
            }),
        }
    }

    /// Blocks until the next feed call may start, then claims the call slot.
    ///
    /// With an active ceiling of `c` calls per second, consecutive admitted calls
    /// start at least `1000 / c` milliseconds apart. A ceiling of zero suspends
    /// admission entirely until the schedule yields a positive ceiling again.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        loop {
            let now = Utc::now();
            let time_of_day = now.hour() * 100 + now.minute();

            // The ceiling only changes at minute boundaries, so it is recomputed at
            // most once per minute.
            let ceiling = match state.cached_ceiling {
                Some((minute, ceiling)) if minute == time_of_day => ceiling,
                _ => {
                    let ceiling = self.schedule.ceiling_at(time_of_day);
                    if state
                        .cached_ceiling
                        .is_none_or(|(_, previous)| previous != ceiling)
                    {
                        info!(calls_per_second = ceiling, "feed rate ceiling changed");
                    }
                    state.cached_ceiling = Some((time_of_day, ceiling));
                    ceiling
                }
            };

            if ceiling == 0 {
                sleep(SUSPENSION_POLL).await;
                continue;
            }

            let spacing = Duration::from_millis(1000 / u64::from(ceiling));
            if let Some(last_call) = state.last_call {
                sleep_until(last_call + spacing).await;
            }

            state.last_call = Some(Instant::now());
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateWindow;

    fn schedule(windows: Vec<(u32, u32)>, override_cps: Option<u32>) -> RateSchedule {
        RateSchedule::from_config(&RateScheduleConfig {
            windows: windows
                .into_iter()
                .map(|(threshold, calls_per_second)| RateWindow {
                    threshold,
                    calls_per_second,
                })
                .collect(),
            override_calls_per_second: override_cps,
        })
    }

    #[test]
    fn ceiling_selects_largest_threshold_at_or_before_now() {
        let schedule = schedule(vec![(0, 20), (1059, 0), (1110, 20)], None);

        assert_eq!(schedule.ceiling_at(0), 20);
        assert_eq!(schedule.ceiling_at(930), 20);
        assert_eq!(schedule.ceiling_at(1059), 0);
        assert_eq!(schedule.ceiling_at(1105), 0);
        assert_eq!(schedule.ceiling_at(1110), 20);
        assert_eq!(schedule.ceiling_at(2359), 20);
    }

    #[test]
    fn override_takes_precedence_when_positive() {
        let schedule = schedule(vec![(0, 20), (1059, 0)], Some(5));

        assert_eq!(schedule.ceiling_at(1100), 5);
        assert_eq!(schedule.ceiling_at(0), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced_by_the_active_ceiling() {
        // A flat 20/s schedule gives a 50ms minimum spacing independent of the
        // wall-clock time of day.
        let gate = RateGate::new(schedule(vec![(0, 20)], None));

        let mut starts = Vec::new();
        for _ in 0..4 {
            gate.acquire().await;
            starts.push(Instant::now());
        }

        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
    }
}
