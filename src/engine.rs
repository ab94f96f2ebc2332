//! Fiscal analytics engine: the record store, scoring, projection and
//! discrepancy detection wired to one immutable configuration

use crate::config::EngineConfig;
use crate::context::CalculationContext;
use crate::discrepancy::{DiscrepancyDetector, RestatementDiscrepancy};
use crate::error::{FaeError, ProjectionError, ScoringError, StoreError};
use crate::hasher::ResultHasher;
use crate::logging::{AuditLogger, Component, LogEntry, LogLevel};
use crate::methodology::{MethodologyRegistry, ScoringMethodology};
use crate::projection::{
    FinancialProjection, FiscalCliffAnalysis, ProjectionEngine, ProjectionScenario, ScenarioSet,
};
use crate::record_store::{NewLineItem, PrimaryView, VersionedRecordStore};
use crate::risk_scoring::{RiskScore, RiskScoringEngine};
use crate::score_history::ScoreHistory;
use crate::traits::Validate;
use crate::types::{FiscalYear, RecordId, VersionType, Version};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of importing one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub id: RecordId,
    pub is_primary: bool,
    /// A restated import compared with the stated primary, or a stated
    /// import compared with restatements that arrived before it
    pub discrepancies: Vec<RestatementDiscrepancy>,
}

/// Projection rows and cliff analysis of one scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario: ProjectionScenario,
    pub projections: Vec<FinancialProjection>,
    pub cliff: FiscalCliffAnalysis,
}

/// Facade over the analytics components
///
/// All operations take `&self`; the store serializes its own writes, and the
/// score history and audit log sit behind their own locks, so the engine can
/// be shared across threads.
pub struct FiscalAnalyticsEngine {
    config: EngineConfig,
    context: CalculationContext,
    store: VersionedRecordStore,
    registry: MethodologyRegistry,
    projection: ProjectionEngine,
    detector: DiscrepancyDetector,
    hasher: ResultHasher,
    history: Mutex<ScoreHistory>,
    logger: Mutex<AuditLogger>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FiscalAnalyticsEngine {
    pub fn builder() -> FiscalAnalyticsEngineBuilder {
        FiscalAnalyticsEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &CalculationContext {
        &self.context
    }

    pub fn store(&self) -> &VersionedRecordStore {
        &self.store
    }

    pub fn registry(&self) -> &MethodologyRegistry {
        &self.registry
    }

    fn log(&self, entry: LogEntry) {
        lock(&self.logger).log(entry);
    }

    fn entry(&self, level: LogLevel, component: Component, message: impl Into<String>) -> LogEntry {
        LogEntry::new(level, self.context.now(), component, message)
    }

    /// Insert a record and compare it with its stated or restated counterparts
    pub fn import(&self, item: NewLineItem) -> Result<ImportOutcome, FaeError> {
        let key = item.key();
        let id = match self.store.insert(item) {
            Ok(id) => id,
            Err(e) => {
                self.log(
                    self.entry(LogLevel::Warn, Component::RecordStore, "record rejected")
                        .with_record_key(key)
                        .with_metadata("error", &e),
                );
                return Err(e.into());
            }
        };
        let record = self.store.get(id)?;
        self.log(
            self.entry(LogLevel::Info, Component::RecordStore, "record imported")
                .with_record_key(key.clone())
                .with_metadata("id", id)
                .with_metadata("version_type", format!("{:?}", record.version_type))
                .with_metadata("primary", record.is_primary),
        );

        let discrepancies = match record.version_type {
            VersionType::Restated => match self.store.get_primary(&key) {
                Ok(stated) => vec![self.detector.compare(&stated, &record)],
                Err(StoreError::PrimaryNotFound { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            },
            VersionType::Stated => self.detector.detect_all(&self.store, &key)?,
        };
        for discrepancy in &discrepancies {
            self.log_discrepancy(discrepancy);
        }

        Ok(ImportOutcome {
            id,
            is_primary: record.is_primary,
            discrepancies,
        })
    }

    fn log_discrepancy(&self, discrepancy: &RestatementDiscrepancy) {
        let level = if discrepancy.requires_review() {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        let percent = discrepancy
            .percent_difference
            .map_or_else(|| "undefined".to_string(), |p| format!("{:.2}", p));
        self.log(
            self.entry(level, Component::Discrepancy, "restatement discrepancy detected")
                .with_record_key(discrepancy.record_key.clone())
                .with_metadata("restated_id", discrepancy.restated_record_id)
                .with_metadata("severity", format!("{:?}", discrepancy.severity))
                .with_metadata("percent_difference", percent)
                .with_metadata("restated_in_cafr_year", discrepancy.restated_in_cafr_year),
        );
    }

    /// Replace a primary stated record with a corrected one
    pub fn correct(&self, old_id: RecordId, item: NewLineItem) -> Result<RecordId, FaeError> {
        let key = item.key();
        match self.store.supersede(old_id, item) {
            Ok(id) => {
                self.log(
                    self.entry(LogLevel::Info, Component::RecordStore, "record superseded")
                        .with_record_key(key)
                        .with_metadata("old_id", old_id)
                        .with_metadata("new_id", id),
                );
                Ok(id)
            }
            Err(e) => {
                self.log(
                    self.entry(LogLevel::Warn, Component::RecordStore, "supersession rejected")
                        .with_record_key(key)
                        .with_metadata("error", &e),
                );
                Err(e.into())
            }
        }
    }

    /// Score a fiscal year with the configured methodology
    pub fn score(&self, fiscal_year: &FiscalYear) -> Result<RiskScore, FaeError> {
        self.score_with(fiscal_year, &self.config.methodology.version, &self.context)
    }

    /// Score a fiscal year with a registered methodology version and context
    pub fn score_with(
        &self,
        fiscal_year: &FiscalYear,
        version: &Version,
        context: &CalculationContext,
    ) -> Result<RiskScore, FaeError> {
        let view = self.store.primary_view(&fiscal_year.city)?;
        let result = self.compute_score(&view, fiscal_year, version, context);
        self.finish_score(fiscal_year, result)
    }

    /// Score several fiscal years in parallel
    ///
    /// Results and history entries follow the order of `years`.
    pub fn score_years(&self, years: &[FiscalYear]) -> Vec<Result<RiskScore, FaeError>> {
        let version = &self.config.methodology.version;
        let computed: Vec<Result<RiskScore, FaeError>> = years
            .par_iter()
            .map(|fiscal_year| -> Result<RiskScore, FaeError> {
                let view = self.store.primary_view(&fiscal_year.city)?;
                self.compute_score(&view, fiscal_year, version, &self.context)
            })
            .collect();

        years
            .iter()
            .zip(computed)
            .map(|(fiscal_year, result)| self.finish_score(fiscal_year, result))
            .collect()
    }

    fn compute_score(
        &self,
        view: &PrimaryView,
        fiscal_year: &FiscalYear,
        version: &Version,
        context: &CalculationContext,
    ) -> Result<RiskScore, FaeError> {
        let methodology = self
            .registry
            .get(version)
            .ok_or_else(|| ScoringError::MethodologyNotFound {
                version: version.clone(),
            })?;
        let engine = RiskScoringEngine::new(methodology.clone())
            .with_analysis_fund(self.config.projection.analysis_fund);
        Ok(engine.score(view, fiscal_year, context)?)
    }

    fn finish_score(
        &self,
        fiscal_year: &FiscalYear,
        result: Result<RiskScore, FaeError>,
    ) -> Result<RiskScore, FaeError> {
        let score = match result {
            Ok(score) => score,
            Err(e) => {
                self.log(
                    self.entry(LogLevel::Error, Component::RiskScoring, "scoring failed")
                        .with_fiscal_year(fiscal_year.clone())
                        .with_metadata("error", &e),
                );
                return Err(e);
            }
        };

        let fingerprint = self.hasher.fingerprint(&score)?;
        for missing in score.insufficient_data() {
            self.log(
                self.entry(LogLevel::Warn, Component::RiskScoring, "insufficient data")
                    .with_fiscal_year(fiscal_year.clone())
                    .with_metadata("error", missing),
            );
        }
        self.log(
            self.entry(LogLevel::Info, Component::RiskScoring, "fiscal year scored")
                .with_fiscal_year(fiscal_year.clone())
                .with_version(score.methodology_version.clone())
                .with_result_hash(fingerprint)
                .with_metadata("overall_score", format!("{:.2}", score.overall_score))
                .with_metadata("risk_level", score.risk_level)
                .with_metadata("input_hash", score.input_hash),
        );

        lock(&self.history).record(score.clone());
        Ok(score)
    }

    /// Scenarios available for a base year
    ///
    /// Scenarios derived from the city's history, with configured scenarios
    /// replacing derived ones of the same code and appended otherwise.
    pub fn scenarios(&self, fiscal_year: &FiscalYear) -> Result<Vec<ProjectionScenario>, FaeError> {
        let view = self.store.primary_view(&fiscal_year.city)?;
        let mut scenarios = ScenarioSet::from_history(&view, fiscal_year, &self.config.projection);
        for configured in &self.config.scenarios {
            match scenarios.iter_mut().find(|s| s.code == configured.code) {
                Some(existing) => *existing = configured.clone(),
                None => scenarios.push(configured.clone()),
            }
        }
        Ok(scenarios)
    }

    fn resolve_scenario(
        &self,
        fiscal_year: &FiscalYear,
        code: &str,
    ) -> Result<ProjectionScenario, FaeError> {
        self.scenarios(fiscal_year)?
            .into_iter()
            .find(|s| s.code == code)
            .ok_or_else(|| {
                ProjectionError::UnknownScenario {
                    code: code.to_string(),
                }
                .into()
            })
    }

    /// Project one scenario `years_ahead` years from the base year
    pub fn project(
        &self,
        fiscal_year: &FiscalYear,
        scenario_code: &str,
        years_ahead: u32,
    ) -> Result<Vec<FinancialProjection>, FaeError> {
        let scenario = self.resolve_scenario(fiscal_year, scenario_code)?;
        let view = self.store.primary_view(&fiscal_year.city)?;
        let rows = self.projection.project(&view, fiscal_year, &scenario, years_ahead)?;
        self.log(
            self.entry(LogLevel::Info, Component::Projection, "scenario projected")
                .with_fiscal_year(fiscal_year.clone())
                .with_metadata("scenario", scenario_code)
                .with_metadata("years_ahead", years_ahead),
        );
        Ok(rows)
    }

    /// Fiscal-cliff analysis of one scenario over the configured horizon
    pub fn find_fiscal_cliff(
        &self,
        fiscal_year: &FiscalYear,
        scenario_code: &str,
    ) -> Result<FiscalCliffAnalysis, FaeError> {
        let scenario = self.resolve_scenario(fiscal_year, scenario_code)?;
        let view = self.store.primary_view(&fiscal_year.city)?;
        let cliff = self.projection.find_fiscal_cliff(&view, fiscal_year, &scenario)?;
        self.log_cliff(&cliff);
        Ok(cliff)
    }

    /// Project every available scenario in parallel
    pub fn project_scenarios(
        &self,
        fiscal_year: &FiscalYear,
    ) -> Result<Vec<ScenarioOutcome>, FaeError> {
        let view = self.store.primary_view(&fiscal_year.city)?;
        let scenarios = self.scenarios(fiscal_year)?;
        let horizon = self.projection.settings().horizon_years;

        let outcomes = scenarios
            .into_par_iter()
            .map(|scenario| -> Result<ScenarioOutcome, ProjectionError> {
                let projections = self.projection.project(&view, fiscal_year, &scenario, horizon)?;
                let cliff = self.projection.find_fiscal_cliff(&view, fiscal_year, &scenario)?;
                Ok(ScenarioOutcome {
                    scenario,
                    projections,
                    cliff,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for outcome in &outcomes {
            self.log_cliff(&outcome.cliff);
        }
        Ok(outcomes)
    }

    fn log_cliff(&self, cliff: &FiscalCliffAnalysis) {
        let mut entry = if cliff.has_cliff {
            self.entry(LogLevel::Warn, Component::Projection, "fiscal cliff projected")
        } else {
            self.entry(LogLevel::Info, Component::Projection, "no fiscal cliff within horizon")
        };
        entry = entry
            .with_fiscal_year(cliff.base_fiscal_year.clone())
            .with_metadata("scenario", &cliff.scenario_code)
            .with_metadata("severity", format!("{:?}", cliff.severity));
        if let Some(year) = cliff.cliff_year {
            entry = entry.with_metadata("cliff_year", year);
        }
        self.log(entry);
    }

    /// One discrepancy per restated record of a city with a stated primary
    pub fn discrepancies(&self, city: &str) -> Result<Vec<RestatementDiscrepancy>, FaeError> {
        let mut found = Vec::new();
        for key in self.store.restated_keys(city)? {
            found.extend(self.detector.detect_all(&self.store, &key)?);
        }
        Ok(found)
    }

    /// Discrepancies of a city that still block publication
    pub fn blocking_discrepancies(
        &self,
        city: &str,
    ) -> Result<Vec<RestatementDiscrepancy>, FaeError> {
        Ok(self
            .discrepancies(city)?
            .into_iter()
            .filter(RestatementDiscrepancy::blocks_publication)
            .collect())
    }

    /// Snapshot of every score run so far
    pub fn history(&self) -> ScoreHistory {
        lock(&self.history).clone()
    }

    /// Snapshot of the audit log
    pub fn audit_log(&self) -> Vec<LogEntry> {
        lock(&self.logger).entries().to_vec()
    }
}

/// Builder for constructing the engine with a fluent API
#[derive(Debug, Default)]
pub struct FiscalAnalyticsEngineBuilder {
    config: Option<EngineConfig>,
    context: Option<CalculationContext>,
    store: Option<VersionedRecordStore>,
    methodologies: Vec<ScoringMethodology>,
    log_level: Option<LogLevel>,
}

impl FiscalAnalyticsEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_context(mut self, context: CalculationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Start from an existing store instead of an empty one
    pub fn with_store(mut self, store: VersionedRecordStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an additional methodology version next to the configured one
    pub fn with_methodology(mut self, methodology: ScoringMethodology) -> Self {
        self.methodologies.push(methodology);
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Build the engine; the configuration is validated here
    pub fn build(self) -> Result<FiscalAnalyticsEngine, FaeError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut registry = MethodologyRegistry::new();
        registry.register(config.methodology.clone())?;
        for methodology in self.methodologies {
            registry.register(methodology)?;
        }

        Ok(FiscalAnalyticsEngine {
            context: self
                .context
                .unwrap_or_else(|| CalculationContext::builder().build()),
            store: self.store.unwrap_or_default(),
            registry,
            projection: ProjectionEngine::new(config.projection.clone()),
            detector: DiscrepancyDetector::new(config.discrepancy_bands),
            hasher: ResultHasher::new(),
            history: Mutex::new(ScoreHistory::new()),
            logger: Mutex::new(AuditLogger::new(self.log_level.unwrap_or(LogLevel::Info))),
            config,
        })
    }
}
