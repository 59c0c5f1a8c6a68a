//! Injectable wall clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of the current instant.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The real clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A clock tests can move by hand.
#[cfg(test)]
pub(crate) fn manual_clock(start: DateTime<Utc>) -> (Clock, Arc<std::sync::Mutex<DateTime<Utc>>>) {
    let now = Arc::new(std::sync::Mutex::new(start));
    let reader = Arc::clone(&now);
    let clock: Clock = Arc::new(move || *reader.lock().unwrap());
    (clock, now)
}
