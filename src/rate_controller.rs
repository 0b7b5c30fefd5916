// src/rate_controller.rs
//! Publication gate: emergency override, quiet hours, daily cap, minimum
//! spacing and hourly burst cap, evaluated in that order.
//!
//! - Rate State (spacing marker, hour window) lives here and only here, behind one mutex.
//! - The daily count is read from durable history on every check.
//! - `try_acquire` checks the gate and reserves a slot under the same lock; the
//!   slot is committed after a successful delivery or released on failure.
//!   Outstanding reservations count against the daily cap, spacing and hourly cap.

use chrono::{DateTime, FixedOffset, TimeZone, Timelike};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{Limits, Thresholds};
use crate::history::HistoryStore;

const ONE_HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Critical,
    High,
    Normal,
}

impl Tier {
    pub fn for_score(score: u8, t: &Thresholds) -> Self {
        if score >= t.critical {
            Tier::Critical
        } else if score >= t.high {
            Tier::High
        } else {
            Tier::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Critical => "CRITICAL",
            Tier::High => "HIGH",
            Tier::Normal => "NORMAL",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    QuietHours,
    DailyCap,
    MinSpacing,
    HourlyBurst,
    /// The daily count could not be read; fail closed.
    StoreUnavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::QuietHours => "quiet_hours",
            DenyReason::DailyCap => "daily_cap",
            DenyReason::MinSpacing => "min_spacing",
            DenyReason::HourlyBurst => "hourly_burst",
            DenyReason::StoreUnavailable => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Allow { overridden: bool },
    Deny { reason: DenyReason },
}

impl GateVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateVerdict::Allow { .. })
    }
}

/// Process-local pacing state. Not persisted across restarts.
#[derive(Debug, Clone, Default)]
pub struct RateState {
    pub last_publish_at: Option<DateTime<FixedOffset>>,
    last_publish_mono: Option<Duration>,
    /// Local wall-clock hour the burst counter belongs to.
    pub hour_window_start: Option<DateTime<FixedOffset>>,
    hour_window_opened_mono: Duration,
    pub hour_count: u32,
    pub in_flight: u32,
}

impl RateState {
    /// Burst count that applies at (`now`, `mono`), without mutating.
    ///
    /// The window follows the local wall-clock hour and only moves forward. If the
    /// wall clock steps backwards the open window is kept until one monotonic hour
    /// has passed since it opened.
    fn hour_count_at(&self, now: DateTime<FixedOffset>, mono: Duration) -> u32 {
        if self.window_expired(now, mono) {
            0
        } else {
            self.hour_count
        }
    }

    fn window_expired(&self, now: DateTime<FixedOffset>, mono: Duration) -> bool {
        match self.hour_window_start {
            None => true,
            Some(start) => {
                hour_floor(now) > start
                    || mono.saturating_sub(self.hour_window_opened_mono) >= ONE_HOUR
            }
        }
    }

    fn roll_window(&mut self, now: DateTime<FixedOffset>, mono: Duration) {
        if self.window_expired(now, mono) {
            self.hour_window_start = Some(hour_floor(now));
            self.hour_window_opened_mono = mono;
            self.hour_count = 0;
        }
    }
}

fn hour_floor(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    t.date_naive()
        .and_hms_opt(t.hour(), 0, 0)
        .and_then(|n| t.offset().from_local_datetime(&n).single())
        .unwrap_or(t)
}

#[derive(Debug, Clone, Serialize)]
pub struct RateSnapshot {
    pub last_publish_at: Option<DateTime<FixedOffset>>,
    pub hour_window_start: Option<DateTime<FixedOffset>>,
    pub hour_count: u32,
    pub in_flight: u32,
    /// Seconds until the spacing gate opens again (0 when open).
    pub spacing_remaining_secs: u64,
}

pub struct RateController {
    limits: Limits,
    thresholds: Thresholds,
    history: Arc<HistoryStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<RateState>,
}

impl fmt::Debug for RateController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateController")
            .field("limits", &self.limits)
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl RateController {
    pub fn new(
        limits: Limits,
        thresholds: Thresholds,
        history: Arc<HistoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limits,
            thresholds,
            history,
            clock,
            state: Mutex::new(RateState::default()),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.limits.min_interval_minutes) * 60)
    }

    /// The five gates in order. Caller holds the state lock.
    fn check(&self, st: &RateState, score: u8) -> GateVerdict {
        // 1) Emergency override bypasses everything below.
        if score >= self.thresholds.emergency {
            return GateVerdict::Allow { overridden: true };
        }

        let now = self.clock.now();
        let mono = self.clock.monotonic();

        // 2) Quiet hours
        if self.limits.quiet_hours.contains(&now.hour()) {
            return GateVerdict::Deny {
                reason: DenyReason::QuietHours,
            };
        }

        // 3) Daily cap (durable count + outstanding reservations)
        match self.history.published_count_in(self.clock.today_bounds()) {
            Ok(published) => {
                if published.saturating_add(st.in_flight) >= self.limits.daily_max {
                    return GateVerdict::Deny {
                        reason: DenyReason::DailyCap,
                    };
                }
            }
            Err(e) => {
                warn!(target: "gate", error = %e, "daily count unavailable; denying");
                return GateVerdict::Deny {
                    reason: DenyReason::StoreUnavailable,
                };
            }
        }

        // 4) Minimum spacing; an outstanding reservation is a publish in progress.
        let interval = self.min_interval();
        if !interval.is_zero() {
            let too_soon = st.in_flight > 0
                || st
                    .last_publish_mono
                    .is_some_and(|last| mono.saturating_sub(last) < interval);
            if too_soon {
                return GateVerdict::Deny {
                    reason: DenyReason::MinSpacing,
                };
            }
        }

        // 5) Hourly burst cap
        if st.hour_count_at(now, mono).saturating_add(st.in_flight) >= self.limits.max_posts_per_hour
        {
            return GateVerdict::Deny {
                reason: DenyReason::HourlyBurst,
            };
        }

        GateVerdict::Allow { overridden: false }
    }

    /// Evaluate the gate without reserving anything.
    pub fn evaluate(&self, score: u8) -> GateVerdict {
        let st = self.lock();
        self.check(&st, score)
    }

    pub fn can_publish_now(&self, score: u8) -> bool {
        self.evaluate(score).is_allowed()
    }

    /// Operator probe: the gate as if the score equalled the publish minimum.
    pub fn probe(&self) -> GateVerdict {
        self.evaluate(self.thresholds.publish)
    }

    /// Check the gate and, on acceptance, reserve a publish slot atomically.
    pub fn try_acquire(self: &Arc<Self>, score: u8) -> Result<PublishPermit, DenyReason> {
        let mut st = self.lock();
        match self.check(&st, score) {
            GateVerdict::Deny { reason } => {
                debug!(target: "gate", score, reason = reason.as_str(), "denied");
                Err(reason)
            }
            GateVerdict::Allow { overridden } => {
                st.in_flight += 1;
                let tier = Tier::for_score(score, &self.thresholds);
                debug!(target: "gate", score, %tier, overridden, "slot reserved");
                Ok(PublishPermit {
                    controller: Arc::clone(self),
                    score,
                    tier,
                    overridden,
                    decided_at: self.clock.now(),
                    settled: false,
                })
            }
        }
    }

    fn settle(&self, published: bool) {
        let mut st = self.lock();
        st.in_flight = st.in_flight.saturating_sub(1);
        if published {
            let now = self.clock.now();
            let mono = self.clock.monotonic();
            st.last_publish_at = Some(now);
            st.last_publish_mono = Some(mono);
            st.roll_window(now, mono);
            st.hour_count += 1;
        }
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let st = self.lock();
        let now = self.clock.now();
        let mono = self.clock.monotonic();
        let spacing_remaining_secs = st
            .last_publish_mono
            .map(|last| self.min_interval().saturating_sub(mono.saturating_sub(last)))
            .unwrap_or_default()
            .as_secs();
        RateSnapshot {
            last_publish_at: st.last_publish_at,
            hour_window_start: st.hour_window_start,
            hour_count: st.hour_count_at(now, mono),
            in_flight: st.in_flight,
            spacing_remaining_secs,
        }
    }
}

/// A reserved publish slot. Commit after a successful delivery; dropping or
/// releasing it returns the slot without touching spacing or the hour window.
#[derive(Debug)]
pub struct PublishPermit {
    controller: Arc<RateController>,
    pub score: u8,
    pub tier: Tier,
    pub overridden: bool,
    pub decided_at: DateTime<FixedOffset>,
    settled: bool,
}

impl PublishPermit {
    pub fn commit(mut self) {
        self.settled = true;
        self.controller.settle(true);
    }

    pub fn release(mut self) {
        self.settled = true;
        self.controller.settle(false);
    }
}

impl Drop for PublishPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.controller.settle(false);
        }
    }
}
