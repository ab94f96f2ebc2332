//! Versioned record store for stated and restated financial line items
//!
//! The store owns the invariants that keep stated and restated amounts apart:
//! tier/version consistency is checked before anything is persisted, exactly
//! one record per [`RecordKey`] is primary, and corrections go through
//! [`VersionedRecordStore::supersede`], which flips the primary flag and links
//! the chain atomically. Scoring and projection read only a [`PrimaryView`],
//! which contains nothing but primary stated records.

use crate::error::StoreError;
use crate::traits::Validate;
use crate::types::{
    FiscalYear, FundType, LineItemKind, RecordId, RecordKey, SourceTier, VersionType,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A validated import record, before the store assigns its identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub fiscal_year: FiscalYear,
    pub kind: LineItemKind,
    pub category: String,
    pub fund: FundType,
    pub amount: f64,
    pub source_tier: SourceTier,
    pub version_type: VersionType,
    pub source_cafr_year: i32,
    pub restatement_reason: Option<String>,
}

impl NewLineItem {
    /// A value taken from the fiscal year's own audited statements
    pub fn stated(
        fiscal_year: FiscalYear,
        kind: LineItemKind,
        category: impl Into<String>,
        amount: f64,
    ) -> Self {
        let source_cafr_year = fiscal_year.year();
        Self {
            fiscal_year,
            kind,
            category: category.into(),
            fund: FundType::General,
            amount,
            source_tier: SourceTier::Financial,
            version_type: VersionType::Stated,
            source_cafr_year,
            restatement_reason: None,
        }
    }

    /// A value for an earlier year republished in a later CAFR's statistical section
    pub fn restated(
        fiscal_year: FiscalYear,
        kind: LineItemKind,
        category: impl Into<String>,
        amount: f64,
        source_cafr_year: i32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            fiscal_year,
            kind,
            category: category.into(),
            fund: FundType::General,
            amount,
            source_tier: SourceTier::Statistical,
            version_type: VersionType::Restated,
            source_cafr_year,
            restatement_reason: Some(reason.into()),
        }
    }

    pub fn in_fund(mut self, fund: FundType) -> Self {
        self.fund = fund;
        self
    }

    pub fn from_tier(mut self, tier: SourceTier) -> Self {
        self.source_tier = tier;
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(
            self.fiscal_year.clone(),
            self.kind,
            self.category.clone(),
            self.fund,
        )
    }
}

impl Validate for NewLineItem {
    type Error = StoreError;

    fn validate(&self) -> Result<(), StoreError> {
        let mismatch = |reason: String| StoreError::TierVersionMismatch {
            key: self.key(),
            reason,
        };

        if self.category.trim().is_empty() {
            return Err(StoreError::InvalidRecord {
                key: self.key(),
                reason: "category must not be empty".to_string(),
            });
        }
        if !self.amount.is_finite() {
            return Err(StoreError::InvalidRecord {
                key: self.key(),
                reason: format!("amount {} is not finite", self.amount),
            });
        }

        let year = self.fiscal_year.year();
        if self.source_cafr_year < year {
            return Err(mismatch(format!(
                "source CAFR year {} precedes fiscal year {}",
                self.source_cafr_year, year
            )));
        }

        match (self.source_tier, self.version_type) {
            (SourceTier::Financial, VersionType::Restated) => {
                return Err(mismatch(
                    "financial statement values are never restated".to_string(),
                ));
            }
            (SourceTier::Financial, VersionType::Stated) if self.source_cafr_year != year => {
                return Err(mismatch(format!(
                    "financial statement value for {} reported by the {} CAFR",
                    year, self.source_cafr_year
                )));
            }
            (SourceTier::Statistical, VersionType::Stated) if self.source_cafr_year > year => {
                return Err(mismatch(format!(
                    "statistical value for {} from the {} CAFR must be marked restated",
                    year, self.source_cafr_year
                )));
            }
            _ => {}
        }

        if self.version_type == VersionType::Restated && self.source_cafr_year == year {
            return Err(mismatch(
                "restated values must be published in a later CAFR".to_string(),
            ));
        }

        Ok(())
    }
}

/// A persisted financial line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialLineItem {
    pub id: RecordId,
    pub fiscal_year: FiscalYear,
    pub kind: LineItemKind,
    pub category: String,
    pub fund: FundType,
    pub amount: f64,
    pub source_tier: SourceTier,
    pub version_type: VersionType,
    pub source_cafr_year: i32,
    pub is_primary: bool,
    pub supersedes_id: Option<RecordId>,
    pub restatement_reason: Option<String>,
}

impl FinancialLineItem {
    fn from_new(
        id: RecordId,
        item: NewLineItem,
        is_primary: bool,
        supersedes_id: Option<RecordId>,
    ) -> Self {
        Self {
            id,
            fiscal_year: item.fiscal_year,
            kind: item.kind,
            category: item.category,
            fund: item.fund,
            amount: item.amount,
            source_tier: item.source_tier,
            version_type: item.version_type,
            source_cafr_year: item.source_cafr_year,
            is_primary,
            supersedes_id,
            restatement_reason: item.restatement_reason,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(
            self.fiscal_year.clone(),
            self.kind,
            self.category.clone(),
            self.fund,
        )
    }

    pub fn is_stated(&self) -> bool {
        self.version_type == VersionType::Stated
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    records: Vec<FinancialLineItem>,
    primary: HashMap<RecordKey, usize>,
}

impl StoreInner {
    fn next_id(&self) -> RecordId {
        RecordId(self.records.len() as u64 + 1)
    }

    fn index_of(&self, id: RecordId) -> Result<usize, StoreError> {
        let index = (id.0 as usize)
            .checked_sub(1)
            .filter(|index| *index < self.records.len())
            .ok_or(StoreError::RecordNotFound { id })?;
        Ok(index)
    }

    fn push(&mut self, record: FinancialLineItem) -> RecordId {
        let id = record.id;
        if record.is_primary {
            self.primary.insert(record.key(), self.records.len());
        }
        self.records.push(record);
        id
    }
}

/// In-memory versioned store of financial line items
///
/// Writes are serialized by an internal lock: every insert or supersession
/// reads the current primary and flips it inside a single write guard.
/// Records are never removed.
#[derive(Debug, Default)]
pub struct VersionedRecordStore {
    inner: RwLock<StoreInner>,
}

impl VersionedRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Insert a new record after checking the tier/version invariants
    ///
    /// The first record for a key becomes primary. A restated record for a
    /// key that already has a primary is kept for comparison only. A stated
    /// record replaces a restated primary, but never a stated one: stated
    /// corrections must go through [`supersede`](Self::supersede).
    pub fn insert(&self, item: NewLineItem) -> Result<RecordId, StoreError> {
        item.validate()?;

        let key = item.key();
        let mut inner = self.write()?;
        let id = inner.next_id();

        let current = inner.primary.get(&key).copied();
        let is_primary = match current {
            None => true,
            Some(_) if item.version_type == VersionType::Restated => false,
            Some(index) => {
                let existing = &inner.records[index];
                if existing.is_stated() {
                    return Err(StoreError::DuplicatePrimary {
                        key,
                        existing: existing.id,
                    });
                }
                inner.records[index].is_primary = false;
                true
            }
        };

        Ok(inner.push(FinancialLineItem::from_new(id, item, is_primary, None)))
    }

    /// Replace the primary record `old_id` with a corrected stated record
    ///
    /// Both writes happen under one lock after all checks pass, so either the
    /// old record is demoted and the new one is primary, or nothing changes.
    pub fn supersede(&self, old_id: RecordId, item: NewLineItem) -> Result<RecordId, StoreError> {
        item.validate()?;
        if item.version_type == VersionType::Restated {
            return Err(StoreError::TierVersionMismatch {
                key: item.key(),
                reason: "restated values are comparison-only and cannot supersede a primary record"
                    .to_string(),
            });
        }

        let mut inner = self.write()?;
        let old_index = inner.index_of(old_id)?;
        let old = &inner.records[old_index];

        if !old.is_primary {
            return Err(StoreError::NotPrimary { id: old_id });
        }
        let new_key = item.key();
        if old.key() != new_key {
            return Err(StoreError::KeyMismatch {
                id: old_id,
                expected: old.key(),
                actual: new_key,
            });
        }

        let id = inner.next_id();
        inner.records[old_index].is_primary = false;
        Ok(inner.push(FinancialLineItem::from_new(id, item, true, Some(old_id))))
    }

    /// Get any record by id, primary or not
    pub fn get(&self, id: RecordId) -> Result<FinancialLineItem, StoreError> {
        let inner = self.read()?;
        let index = inner.index_of(id)?;
        Ok(inner.records[index].clone())
    }

    /// Get the primary stated record for a key
    pub fn get_primary(&self, key: &RecordKey) -> Result<FinancialLineItem, StoreError> {
        let inner = self.read()?;
        inner
            .primary
            .get(key)
            .map(|index| &inner.records[*index])
            .filter(|record| record.is_stated())
            .cloned()
            .ok_or_else(|| StoreError::PrimaryNotFound { key: key.clone() })
    }

    /// All records ever stored for a key, oldest first
    pub fn history(&self, key: &RecordKey) -> Result<Vec<FinancialLineItem>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .records
            .iter()
            .filter(|record| record.key() == *key)
            .cloned()
            .collect())
    }

    /// The restatement for a key published in the most recent CAFR
    pub fn latest_restatement(
        &self,
        key: &RecordKey,
    ) -> Result<Option<FinancialLineItem>, StoreError> {
        Ok(self.restatements(key)?.pop())
    }

    /// Every restatement of a key, ordered by CAFR year then id
    pub fn restatements(&self, key: &RecordKey) -> Result<Vec<FinancialLineItem>, StoreError> {
        let inner = self.read()?;
        let mut restated: Vec<FinancialLineItem> = inner
            .records
            .iter()
            .filter(|record| record.version_type == VersionType::Restated && record.key() == *key)
            .cloned()
            .collect();
        restated.sort_by_key(|record| (record.source_cafr_year, record.id));
        Ok(restated)
    }

    /// Keys of a city that have at least one restated record
    pub fn restated_keys(&self, city: &str) -> Result<Vec<RecordKey>, StoreError> {
        let inner = self.read()?;
        let keys: BTreeSet<RecordKey> = inner
            .records
            .iter()
            .filter(|record| {
                record.version_type == VersionType::Restated && record.fiscal_year.city == city
            })
            .map(FinancialLineItem::key)
            .collect();
        Ok(keys.into_iter().collect())
    }

    /// Snapshot every primary stated record for a city
    pub fn primary_view(&self, city: &str) -> Result<PrimaryView, StoreError> {
        let inner = self.read()?;
        let mut records: Vec<FinancialLineItem> = inner
            .primary
            .values()
            .map(|index| &inner.records[*index])
            .filter(|record| record.fiscal_year.city == city && record.is_stated())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));

        Ok(PrimaryView {
            city: city.to_string(),
            records,
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.records.is_empty())
    }
}

/// Immutable snapshot of a city's primary stated records
///
/// This is the only input the scoring and projection engines accept, so
/// non-primary and restated records cannot reach them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryView {
    city: String,
    records: Vec<FinancialLineItem>,
}

impl PrimaryView {
    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn records(&self) -> &[FinancialLineItem] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fiscal years with at least one record, in chronological order
    pub fn fiscal_years(&self) -> Vec<FiscalYear> {
        let years: BTreeSet<&FiscalYear> = self.records.iter().map(|r| &r.fiscal_year).collect();
        let mut years: Vec<FiscalYear> = years.into_iter().cloned().collect();
        years.sort_by_key(|fy| fy.year_ending);
        years
    }

    /// The fiscal year ending in the given calendar year
    pub fn find_year(&self, year: i32) -> Option<&FiscalYear> {
        self.records
            .iter()
            .map(|r| &r.fiscal_year)
            .find(|fy| fy.year() == year)
    }

    /// The fiscal year immediately preceding `fiscal_year`
    pub fn prior_year(&self, fiscal_year: &FiscalYear) -> Option<&FiscalYear> {
        self.find_year(fiscal_year.year() - 1)
    }

    /// Records of the given fiscal years, in key order
    pub fn records_for(&self, years: &[&FiscalYear]) -> Vec<&FinancialLineItem> {
        self.records
            .iter()
            .filter(|record| years.iter().any(|fy| **fy == record.fiscal_year))
            .collect()
    }

    pub fn amount(&self, key: &RecordKey) -> Option<f64> {
        self.records
            .iter()
            .find(|record| record.key() == *key)
            .map(|record| record.amount)
    }

    /// Sum of all categories of a kind within one fund; `None` when nothing was reported
    pub fn total(
        &self,
        fiscal_year: &FiscalYear,
        kind: LineItemKind,
        fund: FundType,
    ) -> Option<f64> {
        self.sum(|r| r.fiscal_year == *fiscal_year && r.kind == kind && r.fund == fund)
    }

    /// Sum of all categories of a kind across every fund
    pub fn total_all_funds(&self, fiscal_year: &FiscalYear, kind: LineItemKind) -> Option<f64> {
        self.sum(|r| r.fiscal_year == *fiscal_year && r.kind == kind)
    }

    /// Amount per category of a kind within one fund
    pub fn category_totals(
        &self,
        fiscal_year: &FiscalYear,
        kind: LineItemKind,
        fund: FundType,
    ) -> BTreeMap<&str, f64> {
        let mut totals = BTreeMap::new();
        for record in self
            .records
            .iter()
            .filter(|r| r.fiscal_year == *fiscal_year && r.kind == kind && r.fund == fund)
        {
            *totals.entry(record.category.as_str()).or_insert(0.0) += record.amount;
        }
        totals
    }

    fn sum(&self, predicate: impl Fn(&FinancialLineItem) -> bool) -> Option<f64> {
        let mut matched = self.records.iter().filter(|r| predicate(r)).peekable();
        matched.peek()?;
        Some(matched.map(|r| r.amount).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fy(year: i32) -> FiscalYear {
        FiscalYear::new("Springfield", NaiveDate::from_ymd_opt(year, 6, 30).unwrap())
    }

    #[test]
    fn test_first_record_becomes_primary() {
        let store = VersionedRecordStore::new();
        let item = NewLineItem::stated(fy(2020), LineItemKind::Revenue, "property_tax", 50e6);
        let id = store.insert(item).unwrap();

        let record = store.get(id).unwrap();
        assert!(record.is_primary);
        assert_eq!(record.supersedes_id, None);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_financial_restated_is_rejected() {
        let store = VersionedRecordStore::new();
        let item = NewLineItem::restated(
            fy(2020),
            LineItemKind::Revenue,
            "property_tax",
            47_500_000.0,
            2024,
            "reclassification",
        )
        .from_tier(SourceTier::Financial);

        assert!(matches!(
            store.insert(item),
            Err(StoreError::TierVersionMismatch { .. })
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_stated_duplicate_requires_supersede() {
        let store = VersionedRecordStore::new();
        let first = store
            .insert(NewLineItem::stated(fy(2020), LineItemKind::Revenue, "sales_tax", 10.0))
            .unwrap();

        let duplicate = NewLineItem::stated(fy(2020), LineItemKind::Revenue, "sales_tax", 11.0);
        let result = store.insert(duplicate);
        match result {
            Err(StoreError::DuplicatePrimary { existing, .. }) => assert_eq!(existing, first),
            other => panic!("expected duplicate primary, got {:?}", other),
        }
    }

    #[test]
    fn test_stated_record_replaces_restated_primary() {
        let store = VersionedRecordStore::new();
        let restated = store
            .insert(NewLineItem::restated(
                fy(2018),
                LineItemKind::Revenue,
                "sales_tax",
                9.0,
                2022,
                "trend table",
            ))
            .unwrap();
        let stated = store
            .insert(NewLineItem::stated(fy(2018), LineItemKind::Revenue, "sales_tax", 10.0))
            .unwrap();

        assert!(!store.get(restated).unwrap().is_primary);
        assert!(store.get(stated).unwrap().is_primary);
    }

    #[test]
    fn test_get_by_unknown_id() {
        let store = VersionedRecordStore::new();
        assert!(matches!(
            store.get(RecordId(0)),
            Err(StoreError::RecordNotFound { .. })
        ));
        assert!(matches!(
            store.get(RecordId(7)),
            Err(StoreError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_view_totals() {
        let store = VersionedRecordStore::new();
        store
            .insert(NewLineItem::stated(fy(2020), LineItemKind::Revenue, "property_tax", 60.0))
            .unwrap();
        store
            .insert(NewLineItem::stated(fy(2020), LineItemKind::Revenue, "sales_tax", 40.0))
            .unwrap();
        store
            .insert(
                NewLineItem::stated(fy(2020), LineItemKind::Revenue, "water_fees", 25.0)
                    .in_fund(FundType::Enterprise),
            )
            .unwrap();

        let view = store.primary_view("Springfield").unwrap();
        assert_eq!(view.total(&fy(2020), LineItemKind::Revenue, FundType::General), Some(100.0));
        assert_eq!(view.total_all_funds(&fy(2020), LineItemKind::Revenue), Some(125.0));
        assert_eq!(view.total(&fy(2020), LineItemKind::Expenditure, FundType::General), None);
        assert_eq!(
            view.category_totals(&fy(2020), LineItemKind::Revenue, FundType::General)
                .get("property_tax"),
            Some(&60.0)
        );
    }
}
