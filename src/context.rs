//! Calculation context supplying the frozen timestamp of a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deterministic time provider with a frozen time value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicTime {
    current_time: DateTime<Utc>,
}

impl DeterministicTime {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { current_time: time }
    }

    /// Get the frozen time
    pub fn current(&self) -> DateTime<Utc> {
        self.current_time
    }
}

/// Context of one calculation run
///
/// Engines never read the system clock; the timestamp recorded on a score
/// and on every audit entry comes from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationContext {
    time: DeterministicTime,
    requested_by: Option<String>,
}

impl CalculationContext {
    /// Create a context frozen at the given time
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: DeterministicTime::new(time),
            requested_by: None,
        }
    }

    pub fn builder() -> CalculationContextBuilder {
        CalculationContextBuilder::new()
    }

    /// Get the frozen calculation time
    pub fn now(&self) -> DateTime<Utc> {
        self.time.current()
    }

    /// Analyst or job that requested the run, if known
    pub fn requested_by(&self) -> Option<&str> {
        self.requested_by.as_deref()
    }

    /// Create a new context with an updated time and the same requester
    pub fn with_time(&self, time: DateTime<Utc>) -> Self {
        Self {
            time: DeterministicTime::new(time),
            requested_by: self.requested_by.clone(),
        }
    }
}

/// Builder for calculation contexts
#[derive(Debug, Default)]
pub struct CalculationContextBuilder {
    time: Option<DateTime<Utc>>,
    requested_by: Option<String>,
}

impl CalculationContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn requested_by(mut self, requester: impl Into<String>) -> Self {
        self.requested_by = Some(requester.into());
        self
    }

    /// Build the context, freezing the wall clock if no time was given
    pub fn build(self) -> CalculationContext {
        CalculationContext {
            time: DeterministicTime::new(self.time.unwrap_or_else(Utc::now)),
            requested_by: self.requested_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_context_time_is_frozen() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let context = CalculationContext::new(time);

        assert_eq!(context.now(), time);
        assert_eq!(context.now(), context.now());
        assert_eq!(context.requested_by(), None);
    }

    #[test]
    fn test_builder_and_with_time() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 9, 30, 0).unwrap();

        let context = CalculationContext::builder()
            .with_time(time)
            .requested_by("budget-office")
            .build();
        let moved = context.with_time(later);

        assert_eq!(moved.now(), later);
        assert_eq!(moved.requested_by(), Some("budget-office"));
    }
}
