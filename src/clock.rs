//! Time source for reply timestamps.

use chrono::{DateTime, SecondsFormat, Utc};

/// Supplies the current UTC time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as ISO-8601 with millisecond precision, e.g.
    /// `2024-01-01T12:00:00.000Z`.
    fn timestamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a fixed instant.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl FixedClock {
    pub fn epoch() -> Self {
        Self(DateTime::from_timestamp(0, 0).unwrap())
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        assert_eq!(FixedClock::epoch().timestamp(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_system_clock_is_utc() {
        let ts = SystemClock.timestamp();
        assert!(ts.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
