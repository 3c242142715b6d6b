use studyexec::config::Config;

use super::config_fixture;

#[test]
fn test_load_valid_full_config() {
    let config = Config::from_file(config_fixture("valid_full.toml")).expect("Failed to load config");

    assert_eq!(config.studies_dir.to_str(), Some("/srv/studies"));
    assert_eq!(config.results_dir.to_str(), Some("/srv/results"));
    assert_eq!(config.default_timeout_seconds, 600);
    assert_eq!(config.max_output_bytes, 1_048_576);
    assert_eq!(config.stderr_excerpt_chars, 500);
    assert_eq!(config.store.retry_attempts, 5);
    assert_eq!(config.store.retry_backoff_ms, 250);
    assert_eq!(config.dataset.host, "warehouse.internal");
    assert_eq!(config.dataset.port, 6543);
    assert_eq!(config.runtimes.r.command, ["Rscript", "--vanilla", "{script}"]);
    assert_eq!(config.runtimes.r.env.values().collect::<Vec<_>>(), ["/opt/rlibs"]);
    assert_eq!(config.runtimes.python.extension.as_str(), "py");
    assert_eq!(
        config.default_analysis.command.as_deref(),
        Some(&["python3".to_owned(), "/opt/analyses/default.py".to_owned()][..])
    );
}

#[test]
fn test_load_minimal_config_keeps_defaults() {
    let config =
        Config::from_file(config_fixture("valid_minimal.toml")).expect("Failed to load config");

    assert_eq!(config.studies_dir.to_str(), Some("/data/studies"));
    assert_eq!(config.results_dir.to_str(), Some("/data/results"));
    assert_eq!(config.default_timeout_seconds, 300);
    assert_eq!(config.runtimes.r.command, ["Rscript", "{script}"]);
    assert_eq!(config.runtimes.python.command, ["python3", "{script}"]);
    assert_eq!(config.dataset.name, "omop_cdm");
    assert!(config.default_analysis.command.is_none());
}

#[test]
fn test_load_invalid_empty_name() {
    assert!(Config::from_file(config_fixture("invalid_empty_name.toml")).is_err());
}

#[test]
fn test_load_invalid_same_extension() {
    assert!(Config::from_file(config_fixture("invalid_same_extension.toml")).is_err());
}

#[test]
fn test_load_invalid_timeout() {
    assert!(Config::from_file(config_fixture("invalid_timeout.toml")).is_err());
}

#[test]
fn test_load_invalid_extension_chars() {
    assert!(Config::from_file(config_fixture("invalid_extension_chars.toml")).is_err());
}

#[test]
fn test_load_missing_file() {
    let err = Config::from_file(config_fixture("does_not_exist.toml")).unwrap_err();
    assert!(matches!(err, studyexec::ConfigError::ReadFile { .. }));
}
