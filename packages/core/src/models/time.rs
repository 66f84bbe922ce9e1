//! Clock Abstraction
//!
//! Audit stamping reads the current time through [`TimeProvider`] so that
//! tests can pin and advance the clock after handing it to an engine.
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::models::time::{MockTimeProvider, TimeProvider};
//! use chrono::{Duration, TimeZone, Utc};
//! use std::sync::Arc;
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let clock = Arc::new(MockTimeProvider::with_time(start));
//! let shared: Arc<dyn TimeProvider> = clock.clone();
//!
//! clock.advance(Duration::hours(1));
//! assert_eq!(shared.now() - start, Duration::hours(1));
//! ```

use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Source of the current UTC time
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock
///
/// Shared by reference: `set_time` and `advance` take `&self` so the clock can
/// be moved forward while an engine holds it.
#[derive(Debug)]
pub struct MockTimeProvider {
    current_time: RwLock<DateTime<Utc>>,
}

impl MockTimeProvider {
    /// Start at the current wall-clock time
    pub fn new() -> Self {
        Self::with_time(Utc::now())
    }

    pub fn with_time(time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(time),
        }
    }

    pub fn set_time(&self, time: DateTime<Utc>) {
        *self
            .current_time
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = time;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut current = self
            .current_time
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current += duration;
    }
}

impl TimeProvider for MockTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current_time
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}
