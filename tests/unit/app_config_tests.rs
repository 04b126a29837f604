/*!
 * Tests for configuration loading and validation
 */

use subflow::Config;
use subflow::app_config::{CompletionProvider, Formality};
use tempfile::TempDir;

#[test]
fn test_writeTo_thenFromFile_shouldPreserveSettings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conf.json");

    let mut config = Config::default();
    config.segmentation.target_segment_size = 12;
    config.execution.concurrency = 5;
    config.enhancement.style.formality = Formality::Formal;
    config.write_to(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.segmentation.target_segment_size, 12);
    assert_eq!(loaded.execution.concurrency, 5);
    assert_eq!(loaded.enhancement.style.formality, Formality::Formal);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_fromFile_withPartialJson_shouldFillDefaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conf.json");
    std::fs::write(&path, r#"{"source_language": "de", "execution": {"max_retries": 5}}"#).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.source_language, "de");
    assert_eq!(config.execution.max_retries, 5);
    assert_eq!(config.execution.concurrency, Config::default().execution.concurrency);
    assert_eq!(config.completion.provider, CompletionProvider::Ollama);
}

#[test]
fn test_fromFile_withMissingFile_shouldFail() {
    let dir = TempDir::new().unwrap();
    assert!(Config::from_file(dir.path().join("absent.json")).is_err());
}

#[test]
fn test_validate_withZeroConcurrency_shouldFail() {
    let mut config = Config::default();
    config.execution.concurrency = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withUnorderedGaps_shouldFail() {
    let mut config = Config::default();
    config.segmentation.short_gap_secs = 5.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withOutOfRangeThreshold_shouldFail() {
    let mut config = Config::default();
    config.merge.dedup_similarity_threshold = 1.5;
    assert!(config.validate().is_err());
}
