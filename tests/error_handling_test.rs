use chrono::NaiveDate;
use fae::{
    ConfigError, FaeError, FiscalYear, FundType, LineItemKind, ProjectionError, RecordId,
    RecordKey, RiskCategory, ScoringError, SerializationError, StoreError, ValidationError,
    Version,
};
use proptest::prelude::*;

fn fy(year: i32) -> FiscalYear {
    FiscalYear::new("Springfield", NaiveDate::from_ymd_opt(year, 6, 30).unwrap())
}

fn arbitrary_version() -> impl Strategy<Value = Version> {
    (0u32..10, 0u32..20, 0u32..100).prop_map(|(major, minor, patch)| Version::new(major, minor, patch))
}

fn arbitrary_key() -> impl Strategy<Value = RecordKey> {
    (2000i32..2030, "[a-z_]{3,12}").prop_map(|(year, category)| {
        RecordKey::new(fy(year), LineItemKind::Expenditure, category, FundType::General)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property: Store errors name the offending key**
    ///
    /// For any record key, the rendered tier/version mismatch mentions the
    /// key's fiscal year and category.
    #[test]
    fn property_store_error_names_key(key in arbitrary_key(), reason in "[a-z ]{5,30}") {
        let error = StoreError::TierVersionMismatch { key: key.clone(), reason: reason.clone() };
        let message = error.to_string();
        prop_assert!(message.contains(&key.category));
        let expected_year = format!("FY{}", key.fiscal_year.year());
        prop_assert!(message.contains(&expected_year));
        prop_assert!(message.contains(&reason));

        let wrapped: FaeError = error.into();
        prop_assert!(wrapped.to_string().starts_with("Store error:"));
    }

    /// **Property: Missing methodology versions are reported exactly**
    #[test]
    fn property_methodology_not_found_message(version in arbitrary_version()) {
        let error = ScoringError::MethodologyNotFound { version: version.clone() };
        prop_assert!(error.to_string().ends_with(&version.to_string()));
    }
}

#[test]
fn test_error_conversions() {
    let store: FaeError = StoreError::RecordNotFound { id: RecordId(7) }.into();
    assert!(matches!(store, FaeError::Store(StoreError::RecordNotFound { .. })));
    assert!(store.to_string().contains("#7"));

    let scoring: FaeError = ScoringError::InsufficientData {
        fiscal_year: fy(2020),
        category: RiskCategory::PensionStress,
    }
    .into();
    assert!(scoring.to_string().contains("pension_stress"));

    let projection: FaeError = ProjectionError::MissingBaseline {
        fiscal_year: fy(2021),
        missing: vec![LineItemKind::FundBalance],
    }
    .into();
    assert!(matches!(projection, FaeError::Projection(_)));

    let config: ConfigError = ValidationError::InvalidSetting {
        name: "horizon_years".to_string(),
        reason: "must be at least one year".to_string(),
    }
    .into();
    assert!(matches!(config, ConfigError::Invalid(_)));

    let parse: ConfigError = SerializationError::DeserializationFailed {
        reason: "eof".to_string(),
    }
    .into();
    let top: FaeError = parse.into();
    assert!(top.to_string().starts_with("Configuration error:"));
}

#[test]
fn test_duplicate_primary_message_points_to_supersede() {
    let key = RecordKey::new(fy(2020), LineItemKind::Revenue, "property_tax", FundType::General);
    let error = StoreError::DuplicatePrimary {
        key,
        existing: RecordId(3),
    };
    let message = error.to_string();
    assert!(message.contains("supersede"));
    assert!(message.contains("#3"));
}
