use chrono::{NaiveDate, TimeZone, Utc};
use fae::projection::{INFLATION_RATE, PENSION_GROWTH_RATE, REVENUE_GROWTH_RATE};
use fae::{
    CalculationContext, Component, DiscrepancySeverity, EngineConfig, FaeError, FiscalAnalyticsEngine,
    FiscalYear, FundType, LineItemKind, LogLevel, NewLineItem, ProjectionScenario, RecordKey,
    ScoreComparator, ScoringMethodology, Thresholds, Version,
};

fn fy(year: i32) -> FiscalYear {
    FiscalYear::new("Springfield", NaiveDate::from_ymd_opt(year, 6, 30).unwrap())
}

fn engine() -> FiscalAnalyticsEngine {
    FiscalAnalyticsEngine::builder()
        .with_context(CalculationContext::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()))
        .build()
        .unwrap()
}

fn load_year(engine: &FiscalAnalyticsEngine, year: i32, property_tax: f64, expenditure: f64, fund_balance: f64) {
    for item in [
        NewLineItem::stated(fy(year), LineItemKind::Revenue, "property_tax", property_tax),
        NewLineItem::stated(fy(year), LineItemKind::Revenue, "sales_tax", 40_000_000.0),
        NewLineItem::stated(fy(year), LineItemKind::Expenditure, "operations", expenditure),
        NewLineItem::stated(fy(year), LineItemKind::FundBalance, "unassigned", fund_balance),
    ] {
        engine.import(item).unwrap();
    }
}

fn property_tax_key(year: i32) -> RecordKey {
    RecordKey::new(fy(year), LineItemKind::Revenue, "property_tax", FundType::General)
}

#[test]
fn test_restatement_flagged_but_scoring_uses_stated_value() {
    let engine = engine();
    load_year(&engine, 2019, 48_000_000.0, 86_000_000.0, 18_000_000.0);
    load_year(&engine, 2020, 50_000_000.0, 88_000_000.0, 20_000_000.0);

    let before = engine.score(&fy(2020)).unwrap();

    // The FY2024 CAFR republishes FY2020 property tax revenue 5% lower
    let outcome = engine
        .import(NewLineItem::restated(
            fy(2020),
            LineItemKind::Revenue,
            "property_tax",
            47_500_000.0,
            2024,
            "reclassified tax increment revenue",
        ))
        .unwrap();

    assert!(!outcome.is_primary);
    assert_eq!(outcome.discrepancies.len(), 1);
    let discrepancy = &outcome.discrepancies[0];
    assert_eq!(discrepancy.percent_difference, Some(-5.0));
    assert_eq!(discrepancy.severity, DiscrepancySeverity::Major);
    assert!(discrepancy.requires_review());

    let warnings: Vec<_> = engine
        .audit_log()
        .into_iter()
        .filter(|e| e.component == Component::Discrepancy && e.level == LogLevel::Warn)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].record_key, Some(property_tax_key(2020)));

    // Scoring still reads the stated $50M
    let after = engine.score(&fy(2020)).unwrap();
    let view = engine.store().primary_view("Springfield").unwrap();
    assert_eq!(view.amount(&property_tax_key(2020)), Some(50_000_000.0));
    assert_eq!(
        view.total(&fy(2020), LineItemKind::Revenue, FundType::General),
        Some(90_000_000.0)
    );
    assert_eq!(before.input_hash, after.input_hash);
    assert_eq!(before.overall_score, after.overall_score);

    assert_eq!(engine.discrepancies("Springfield").unwrap().len(), 1);
    assert_eq!(engine.blocking_discrepancies("Springfield").unwrap().len(), 1);
}

#[test]
fn test_restatements_imported_out_of_cafr_order() {
    let engine = engine();
    engine
        .import(NewLineItem::stated(fy(2020), LineItemKind::Revenue, "property_tax", 100.0))
        .unwrap();
    let later = engine
        .import(NewLineItem::restated(fy(2020), LineItemKind::Revenue, "property_tax", 100.5, 2024, "audit adjustment"))
        .unwrap();
    let earlier = engine
        .import(NewLineItem::restated(fy(2020), LineItemKind::Revenue, "property_tax", 120.0, 2022, "fund reclassification"))
        .unwrap();

    assert_eq!(later.discrepancies[0].severity, DiscrepancySeverity::Minor);
    assert_eq!(earlier.discrepancies.len(), 1);
    let critical = &earlier.discrepancies[0];
    assert_eq!(critical.restated_record_id, earlier.id);
    assert_eq!(critical.restated_value, 120.0);
    assert_eq!(critical.restated_in_cafr_year, 2022);
    assert_eq!(critical.severity, DiscrepancySeverity::Critical);

    let warnings = engine
        .audit_log()
        .into_iter()
        .filter(|e| e.component == Component::Discrepancy && e.level == LogLevel::Warn)
        .count();
    assert_eq!(warnings, 1);

    assert_eq!(engine.discrepancies("Springfield").unwrap().len(), 2);
    let blocking = engine.blocking_discrepancies("Springfield").unwrap();
    assert_eq!(blocking.len(), 1);
    assert_eq!(blocking[0].restated_record_id, earlier.id);
}

#[test]
fn test_stated_import_after_restatement_is_compared() {
    let engine = engine();
    let restated = engine
        .import(NewLineItem::restated(fy(2020), LineItemKind::Expenditure, "operations", 88.0, 2023, "prior period adjustment"))
        .unwrap();
    assert!(restated.is_primary);
    assert!(restated.discrepancies.is_empty());

    let stated = engine
        .import(NewLineItem::stated(fy(2020), LineItemKind::Expenditure, "operations", 80.0))
        .unwrap();
    assert!(stated.is_primary);
    assert_eq!(stated.discrepancies.len(), 1);
    assert_eq!(stated.discrepancies[0].stated_record_id, stated.id);
    assert_eq!(stated.discrepancies[0].severity, DiscrepancySeverity::Critical);

    let logged = engine
        .audit_log()
        .into_iter()
        .filter(|e| e.component == Component::Discrepancy && e.level == LogLevel::Warn)
        .count();
    assert_eq!(logged, 1);
}

#[test]
fn test_supersession_changes_score_and_history_keeps_runs() {
    let engine = engine();
    load_year(&engine, 2019, 48_000_000.0, 86_000_000.0, 18_000_000.0);
    load_year(&engine, 2020, 50_000_000.0, 88_000_000.0, 20_000_000.0);

    let original = engine.score(&fy(2020)).unwrap();

    let stated = engine.store().get_primary(&property_tax_key(2020)).unwrap();
    let corrected = engine
        .correct(
            stated.id,
            NewLineItem::stated(fy(2020), LineItemKind::Revenue, "property_tax", 40_000_000.0),
        )
        .unwrap();
    assert_eq!(engine.store().get(corrected).unwrap().supersedes_id, Some(stated.id));

    let recalculated = engine.score(&fy(2020)).unwrap();
    assert_ne!(original.input_hash, recalculated.input_hash);
    assert!(recalculated.overall_score > original.overall_score);

    let history = engine.history();
    let runs = history.runs(&fy(2020));
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].overall_score, original.overall_score);
    assert_eq!(runs[1].overall_score, recalculated.overall_score);

    let comparison = ScoreComparator::new().compare(&runs[0], &runs[1]).unwrap();
    assert!(!comparison.fingerprints_match);
    assert!(!comparison.input_hash_matches);
    assert!(comparison.overall_delta > 0.0);
    assert!(!comparison.changed_indicators().is_empty());
}

#[test]
fn test_stated_duplicate_rejected_through_engine() {
    let engine = engine();
    engine
        .import(NewLineItem::stated(fy(2020), LineItemKind::Revenue, "property_tax", 50.0))
        .unwrap();
    let err = engine
        .import(NewLineItem::stated(fy(2020), LineItemKind::Revenue, "property_tax", 51.0))
        .unwrap_err();
    assert!(matches!(err, FaeError::Store(_)));
    assert_eq!(engine.store().len().unwrap(), 1);
}

#[test]
fn test_methodology_versions_side_by_side() {
    let stricter = ScoringMethodology::standard()
        .with_thresholds(
            Version::new(1, 1, 0),
            "LIQ_FUND_BALANCE_RATIO",
            Thresholds::new(0.30, 0.25, 0.20, 0.15),
        )
        .unwrap();
    let engine = FiscalAnalyticsEngine::builder()
        .with_context(CalculationContext::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()))
        .with_methodology(stricter)
        .build()
        .unwrap();
    load_year(&engine, 2020, 50_000_000.0, 88_000_000.0, 20_000_000.0);

    let v1 = engine.score(&fy(2020)).unwrap();
    let v11 = engine
        .score_with(&fy(2020), &Version::new(1, 1, 0), engine.context())
        .unwrap();
    assert_eq!(v1.methodology_version, Version::new(1, 0, 0));
    assert_eq!(v11.methodology_version, Version::new(1, 1, 0));
    assert!(v11.overall_score >= v1.overall_score);

    let missing = engine.score_with(&fy(2020), &Version::new(9, 0, 0), engine.context());
    assert!(matches!(missing, Err(FaeError::Scoring(_))));
    assert_eq!(engine.history().runs(&fy(2020)).len(), 2);
}

#[test]
fn test_project_scenarios_in_parallel() {
    let config = EngineConfig {
        scenarios: vec![ProjectionScenario::new("austerity", "Austerity")
            .with_assumption(REVENUE_GROWTH_RATE, 0.01)
            .with_assumption(INFLATION_RATE, 0.0)
            .with_assumption(PENSION_GROWTH_RATE, 0.0)],
        ..EngineConfig::default()
    };
    let engine = FiscalAnalyticsEngine::builder()
        .with_config(config)
        .with_context(CalculationContext::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()))
        .build()
        .unwrap();
    engine
        .import(NewLineItem::stated(fy(2020), LineItemKind::Revenue, "taxes", 298_000_000.0))
        .unwrap();
    engine
        .import(NewLineItem::stated(fy(2020), LineItemKind::Expenditure, "operations", 343_000_000.0))
        .unwrap();
    engine
        .import(NewLineItem::stated(fy(2020), LineItemKind::FundBalance, "unassigned", 55_000_000.0))
        .unwrap();

    let outcomes = engine.project_scenarios(&fy(2020)).unwrap();
    let codes: Vec<&str> = outcomes.iter().map(|o| o.scenario.code.as_str()).collect();
    assert_eq!(codes, vec!["base", "optimistic", "pessimistic", "austerity"]);

    for outcome in &outcomes {
        assert_eq!(outcome.projections.len(), 10);
        assert!(outcome.cliff.has_cliff, "{} should reach a cliff", outcome.scenario.code);
        assert_eq!(outcome.cliff.cliff_year, Some(2021));
    }

    let cliff = engine.find_fiscal_cliff(&fy(2020), "austerity").unwrap();
    assert_eq!(cliff, outcomes[3].cliff);

    let cliff_logs = engine
        .audit_log()
        .into_iter()
        .filter(|e| e.component == Component::Projection && e.level == LogLevel::Warn)
        .count();
    assert_eq!(cliff_logs, 5);
}

#[test]
fn test_audit_log_records_scoring() {
    let engine = engine();
    load_year(&engine, 2020, 50_000_000.0, 88_000_000.0, 20_000_000.0);
    let score = engine.score(&fy(2020)).unwrap();

    let log = engine.audit_log();
    let scored: Vec<_> = log
        .iter()
        .filter(|e| e.component == Component::RiskScoring && e.level == LogLevel::Info)
        .collect();
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0].version, Some(score.methodology_version.clone()));
    assert_eq!(scored[0].timestamp, engine.context().now());
    assert!(scored[0].result_hash.is_some());

    // Pension and debt data were never imported
    let insufficient = log
        .iter()
        .filter(|e| e.component == Component::RiskScoring && e.level == LogLevel::Warn)
        .count();
    assert_eq!(insufficient, 2);
}
