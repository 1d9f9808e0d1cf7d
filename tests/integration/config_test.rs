//! Configuration loading tests

use rust_decimal_macros::dec;
use std::io::Write;
use stop_guard::config::{Config, ConfigError, EXAMPLE_CONFIG};
use stop_guard::telemetry::LogFormat;
use tempfile::NamedTempFile;

#[test]
fn test_example_config_parses_and_validates() {
    let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.api.calls_per_second, 10);
    assert_eq!(config.stop_loss.atr_timeframe, "15m");
    assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [stop_loss]
        risk_percentage = 0.015
        price_precision = 2

        [strategies]
        profit_step = false
        "#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.stop_loss.risk_percentage, dec!(0.015));
    assert_eq!(config.stop_loss.price_precision, Some(2));
    assert!(!config.strategies.profit_step);
    assert_eq!(config.monitoring.normal_interval_secs, 30);
}

#[test]
fn test_load_rejects_invalid_values() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[api]\ncalls_per_second = 0").unwrap();

    let err = Config::load(file.path()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::NotPositive {
            field: "api.calls_per_second"
        })
    );
}

#[test]
fn test_load_rejects_malformed_toml() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[monitoring\nnormal_interval_secs = ").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_missing_file_falls_back_to_example() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_or_default(dir.path().join("config.toml")).unwrap();
    assert_eq!(config.api.calls_per_second, 10);
    assert_eq!(config.api.call_timeout_ms, 10_000);
    assert_eq!(config.stop_loss.risk_percentage, dec!(0.02));
}

#[test]
fn test_invalid_file_is_not_replaced_by_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[stop_loss]\nrisk_percentage = -0.5").unwrap();

    let err = Config::load_or_default(file.path()).unwrap_err();
    assert!(err
        .chain()
        .any(|cause| cause.downcast_ref::<ConfigError>()
            == Some(&ConfigError::Negative {
                field: "stop_loss.risk_percentage"
            })));
}

#[test]
fn test_malformed_file_is_not_replaced_by_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[api\ncalls_per_second = ").unwrap();
    assert!(Config::load_or_default(file.path()).is_err());
}
