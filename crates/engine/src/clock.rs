//! Injected time and id sources, so lifecycle behavior is reproducible in tests.

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
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

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub trait OrderIdGenerator: Send + Sync {
    fn next_id(&mut self) -> String;
}

/// `order_1`, `order_2`, ...
#[derive(Debug, Clone, Default)]
pub struct SequentialIdGenerator {
    issued: u64,
}

impl OrderIdGenerator for SequentialIdGenerator {
    fn next_id(&mut self) -> String {
        self.issued += 1;
        format!("order_{}", self.issued)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl OrderIdGenerator for UuidIdGenerator {
    fn next_id(&mut self) -> String {
        format!("order_{}", Uuid::new_v4())
    }
}

/// 23:59:59.999 of the local calendar day containing `now`.
pub fn end_of_local_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let last_instant = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    let local_end = now.with_timezone(&Local).date_naive().and_time(last_instant);
    match local_end.and_local_timezone(Local).earliest() {
        Some(end) => end.with_timezone(&Utc),
        // The instant does not exist locally (a DST gap); close out a day from now instead.
        None => now + Duration::days(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_count_up() {
        let mut ids = SequentialIdGenerator::default();
        assert_eq!(ids.next_id(), "order_1");
        assert_eq!(ids.next_id(), "order_2");
    }

    #[test]
    fn uuid_ids_are_unique() {
        let mut ids = UuidIdGenerator;
        assert_ne!(ids.next_id(), ids.next_id());
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }

    #[test]
    fn day_ends_later_the_same_local_day() {
        let now = Utc::now();
        let end = end_of_local_day(now);
        assert!(end >= now);
        let local_end = end.with_timezone(&Local);
        assert_eq!(local_end.date_naive(), now.with_timezone(&Local).date_naive());
        assert_eq!(local_end.time(), NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap());
    }
}
