// src/clock.rs
//! Time source for the gate: local wall-clock time (quiet hours, calendar day,
//! hour windows) plus a monotonic reading (spacing, skew guard).

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Local, NaiveDate, TimeZone};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Current wall-clock time in the operator's local offset.
    fn now(&self) -> DateTime<FixedOffset>;
    /// Monotonic time since the clock was created. Never goes backwards.
    fn monotonic(&self) -> Duration;

    /// Unix-second bounds `[start, end)` of today's local calendar day.
    /// The default treats the current offset as fixed for the whole day.
    fn today_bounds(&self) -> (i64, i64) {
        local_day_bounds(&self.now())
    }
}

/// Unix-second bounds `[start, end)` of the calendar day containing `reference`,
/// in `reference`'s own zone. Across a DST change the day is 23 or 25 hours.
pub fn local_day_bounds<Tz: TimeZone>(reference: &DateTime<Tz>) -> (i64, i64) {
    let tz = reference.timezone();
    let day = reference.date_naive();
    let start = start_of_day(&tz, day).unwrap_or_else(|| reference.timestamp());
    let end = day
        .succ_opt()
        .and_then(|next| start_of_day(&tz, next))
        .unwrap_or(start + 86_400);
    (start, end)
}

/// First instant of `day` in `tz`. Zones that skip midnight start at 01:00.
fn start_of_day<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> Option<i64> {
    let midnight = day.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + ChronoDuration::hours(1)))
                .earliest()
        })
        .map(|t| t.timestamp())
}

/// Process clock backed by `chrono::Local` and `Instant`.
#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    fn monotonic(&self) -> Duration {
        self.started.elapsed()
    }

    fn today_bounds(&self) -> (i64, i64) {
        local_day_bounds(&Local::now())
    }
}

/// Hand-driven clock for tests and simulations.
///
/// `advance` moves both readings forward; `set_wall` jumps only the wall clock,
/// which is how a backward NTP step looks from inside the process.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    wall: DateTime<FixedOffset>,
    mono: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                wall: start,
                mono: Duration::ZERO,
            }),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        st.mono += by;
        st.wall += ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
    }

    pub fn advance_minutes(&self, minutes: u64) {
        self.advance(Duration::from_secs(minutes * 60));
    }

    pub fn set_wall(&self, wall: DateTime<FixedOffset>) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        st.wall = wall;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).wall
    }

    fn monotonic(&self) -> Duration {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).mono
    }
}
