//! Time source and time-bounded cells.
//!
//! Every TTL decision in the crate (result cache freshness, heading index
//! rebuilds) goes through a [`Clock`] so tests can move time explicitly.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A value paired with the instant it was built, valid for a fixed TTL.
#[derive(Debug, Clone)]
pub struct TtlCell<T> {
    slot: Option<(T, DateTime<Utc>)>,
    ttl: Duration,
}

impl<T: Clone> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { slot: None, ttl }
    }

    /// Returns the value while `now - built_at < ttl`.
    pub fn get(&self, now: DateTime<Utc>) -> Option<T> {
        match &self.slot {
            Some((value, built_at)) if now - *built_at < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, value: T, now: DateTime<Utc>) {
        self.slot = Some((value, now));
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.slot.as_ref().map(|(_, at)| *at)
    }
}
