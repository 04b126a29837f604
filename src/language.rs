use anyhow::{Result, anyhow};
use isolang::Language;

/// ISO 639-2/B codes that differ from their ISO 639-2/T form
const BIBLIOGRAPHIC_CODES: &[(&str, &str)] = &[
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("dut", "nld"),
    ("fre", "fra"),
    ("geo", "kat"),
    ("ger", "deu"),
    ("gre", "ell"),
    ("ice", "isl"),
    ("mac", "mkd"),
    ("may", "msa"),
    ("per", "fas"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

/// Resolve a language code, ignoring a region suffix such as `-BR`
fn lookup(code: &str) -> Option<Language> {
    let base = code
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_lowercase();

    match base.len() {
        2 => Language::from_639_1(&base),
        3 => {
            let terminological = BIBLIOGRAPHIC_CODES
                .iter()
                .find(|(b, _)| *b == base)
                .map(|(_, t)| *t)
                .unwrap_or(base.as_str());
            Language::from_639_3(terminological)
        }
        _ => None,
    }
}

/// Normalize a language code to ISO 639-1 when one exists, else ISO 639-3
pub fn normalize_code(code: &str) -> Result<String> {
    let language = lookup(code).ok_or_else(|| anyhow!("Invalid language code: {}", code))?;
    Ok(language
        .to_639_1()
        .map(str::to_string)
        .unwrap_or_else(|| language.to_639_3().to_string()))
}

/// Whether two codes name the same language
pub fn codes_match(a: &str, b: &str) -> bool {
    match (lookup(a), lookup(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// English name of a language, falling back to the code itself
pub fn language_name(code: &str) -> String {
    lookup(code)
        .map(|language| language.to_name().to_string())
        .unwrap_or_else(|| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizeCode_shouldAcceptAllForms() {
        assert_eq!(normalize_code("fr").unwrap(), "fr");
        assert_eq!(normalize_code("FRA").unwrap(), "fr");
        assert_eq!(normalize_code("fre").unwrap(), "fr");
        assert_eq!(normalize_code("pt-BR").unwrap(), "pt");
        assert!(normalize_code("xx").is_err());
        assert!(normalize_code("").is_err());
    }

    #[test]
    fn test_codesMatch_shouldCompareLanguages() {
        assert!(codes_match("de", "ger"));
        assert!(codes_match("ja", "jpn"));
        assert!(!codes_match("de", "fr"));
        assert!(!codes_match("zz", "zz"));
    }

    #[test]
    fn test_languageName_shouldFallBackToCode() {
        assert_eq!(language_name("en"), "English");
        assert_eq!(language_name("klingon"), "klingon");
    }
}
