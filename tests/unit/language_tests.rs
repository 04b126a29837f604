/*!
 * Tests for language code utilities
 */

use subflow::{codes_match, language_name, normalize_code};

#[test]
fn test_normalizeCode_withBibliographicCode_shouldReturnTwoLetterCode() {
    assert_eq!(normalize_code("ger").unwrap(), "de");
    assert_eq!(normalize_code("deu").unwrap(), "de");
    assert_eq!(normalize_code("pt-BR").unwrap(), "pt");
}

#[test]
fn test_normalizeCode_withUnknownCode_shouldFail() {
    assert!(normalize_code("xx").is_err());
    assert!(normalize_code("").is_err());
    assert!(normalize_code("french").is_err());
}

#[test]
fn test_codesMatch_acrossForms() {
    assert!(codes_match("fr", "fre"));
    assert!(codes_match("ja", "jpn"));
    assert!(!codes_match("fr", "de"));
    assert!(!codes_match("fr", "zz"));
}

#[test]
fn test_languageName_shouldFallBackToCode() {
    assert_eq!(language_name("es"), "Spanish");
    assert_eq!(language_name("zz-unknown"), "zz-unknown");
}
