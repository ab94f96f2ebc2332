//! Structured audit logging for engine operations
//!
//! Entries are collected in memory and stamped with the calculation
//! context's time, so logging never influences a result and two runs with
//! the same context produce the same log.

use crate::types::{FiscalYear, RecordKey, ResultHash, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log level for audit logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Engine component that emitted an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    RecordStore,
    RiskScoring,
    Projection,
    Discrepancy,
    Engine,
}

/// A structured audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Time from the calculation context, not the wall clock
    pub timestamp: DateTime<Utc>,
    pub component: Component,
    pub fiscal_year: Option<FiscalYear>,
    pub record_key: Option<RecordKey>,
    /// Methodology version if applicable
    pub version: Option<Version>,
    pub result_hash: Option<ResultHash>,
    pub message: String,
    pub metadata: Vec<(String, String)>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        timestamp: DateTime<Utc>,
        component: Component,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            timestamp,
            component,
            fiscal_year: None,
            record_key: None,
            version: None,
            result_hash: None,
            message: message.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_fiscal_year(mut self, fiscal_year: FiscalYear) -> Self {
        self.fiscal_year = Some(fiscal_year);
        self
    }

    /// Attach a record key; also sets the fiscal year
    pub fn with_record_key(mut self, key: RecordKey) -> Self {
        self.fiscal_year = Some(key.fiscal_year.clone());
        self.record_key = Some(key);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_result_hash(mut self, hash: ResultHash) -> Self {
        self.result_hash = Some(hash);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.push((key.into(), value.to_string()));
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// In-memory audit logger with a minimum level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogger {
    entries: Vec<LogEntry>,
    min_level: LogLevel,
}

impl AuditLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            entries: Vec::new(),
            min_level,
        }
    }

    /// Create a logger that captures all levels
    pub fn all() -> Self {
        Self::new(LogLevel::Trace)
    }

    pub fn with_info_level() -> Self {
        Self::new(LogLevel::Info)
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Record an entry if it meets the minimum level
    pub fn log(&mut self, entry: LogEntry) {
        if entry.level >= self.min_level {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn filter_by_level(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.level == level).collect()
    }

    pub fn filter_by_component(&self, component: Component) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.component == component)
            .collect()
    }

    pub fn filter_by_fiscal_year(&self, fiscal_year: &FiscalYear) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.fiscal_year.as_ref() == Some(fiscal_year))
            .collect()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::with_info_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundType, LineItemKind};
    use chrono::NaiveDate;

    fn fy(year: i32) -> FiscalYear {
        FiscalYear::new("Springfield", NaiveDate::from_ymd_opt(year, 6, 30).unwrap())
    }

    #[test]
    fn test_min_level_filters() {
        let mut logger = AuditLogger::with_info_level();
        let now = DateTime::<Utc>::default();

        logger.log(LogEntry::new(LogLevel::Debug, now, Component::Engine, "dropped"));
        logger.log(LogEntry::new(LogLevel::Warn, now, Component::Discrepancy, "kept"));

        assert_eq!(logger.len(), 1);
        assert_eq!(logger.entries()[0].message, "kept");
        assert_eq!(logger.filter_by_level(LogLevel::Warn).len(), 1);
    }

    #[test]
    fn test_record_key_sets_fiscal_year() {
        let mut logger = AuditLogger::all();
        let key = RecordKey::new(fy(2020), LineItemKind::Revenue, "taxes", FundType::General);

        let at = DateTime::<Utc>::default();
        logger.log(
            LogEntry::new(LogLevel::Info, at, Component::RecordStore, "imported")
                .with_record_key(key.clone())
                .with_metadata("amount", 50.0),
        );
        logger.log(
            LogEntry::new(LogLevel::Info, at, Component::RiskScoring, "scored")
                .with_fiscal_year(fy(2021)),
        );

        let entries = logger.filter_by_fiscal_year(&fy(2020));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record_key.as_ref(), Some(&key));
        assert_eq!(entries[0].metadata_value("amount"), Some("50"));
        assert_eq!(logger.filter_by_component(Component::RiskScoring).len(), 1);
    }
}
