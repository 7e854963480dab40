//! Locale codes and the configured locale set.
//!
//! A `Locale` is a validated language code (e.g. "fr", "de", "pt-BR").
//! `LocaleSet` holds the source locale plus every locale a post may be
//! translated into, and decides which provider result keys are writable.

use crate::error::{Result, TranslationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key the provider uses for the echoed source text in a result payload
pub const SOURCE_KEY: &str = "source";

/// A validated locale code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// Parse a locale code.
    ///
    /// Accepts a 2-3 letter language subtag, optionally followed by `-` or
    /// `_` and a region subtag. The language subtag is lowercased; `_` is
    /// normalised to `-`. The reserved `source` key is never a locale.
    pub fn parse(code: &str) -> Result<Locale> {
        let code = code.trim();
        let mut parts = code.splitn(2, ['-', '_']);
        let language = parts.next().unwrap_or_default();

        let language_ok = (2..=3).contains(&language.len())
            && language.chars().all(|c| c.is_ascii_alphabetic());
        if !language_ok || code.eq_ignore_ascii_case(SOURCE_KEY) {
            return Err(TranslationError::InvalidLocale(code.to_string()));
        }

        match parts.next() {
            None => Ok(Locale(language.to_ascii_lowercase())),
            Some(region)
                if (2..=8).contains(&region.len())
                    && region.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                Ok(Locale(format!("{}-{}", language.to_ascii_lowercase(), region)))
            }
            Some(_) => Err(TranslationError::InvalidLocale(code.to_string())),
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl FromStr for Locale {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self> {
        Locale::parse(s)
    }
}

impl TryFrom<String> for Locale {
    type Error = TranslationError;

    fn try_from(value: String) -> Result<Self> {
        Locale::parse(&value)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a comma separated list of locale codes, dropping duplicates but
/// keeping the first-seen order.
pub fn parse_list(raw: &str) -> Result<Vec<Locale>> {
    let mut locales: Vec<Locale> = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let locale = Locale::parse(code)?;
        if !locales.contains(&locale) {
            locales.push(locale);
        }
    }
    Ok(locales)
}

/// The source locale plus all locales posts are stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleSet {
    source: Locale,
    available: Vec<Locale>,
}

impl LocaleSet {
    /// Build a locale set. The source locale is always part of `available`.
    pub fn new(source: Locale, mut available: Vec<Locale>) -> Self {
        if !available.contains(&source) {
            available.insert(0, source.clone());
        }
        Self { source, available }
    }

    pub fn source(&self) -> &Locale {
        &self.source
    }

    pub fn available(&self) -> &[Locale] {
        &self.available
    }

    /// Every available locale except the source one
    pub fn translatable(&self) -> Vec<Locale> {
        self.available
            .iter()
            .filter(|l| **l != self.source)
            .cloned()
            .collect()
    }

    /// Whether a translation may be written for this locale
    pub fn accepts(&self, locale: &Locale) -> bool {
        *locale != self.source && self.available.contains(locale)
    }
}

impl Default for LocaleSet {
    fn default() -> Self {
        Self::new(
            Locale("en".to_string()),
            vec![
                Locale("en".to_string()),
                Locale("fr".to_string()),
                Locale("de".to_string()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locale(code: &str) -> Locale {
        Locale::parse(code).expect("valid locale")
    }

    #[test]
    fn test_parse_simple_codes() {
        assert_eq!(locale("fr").code(), "fr");
        assert_eq!(locale("DE").code(), "de");
        assert_eq!(locale(" es ").code(), "es");
        assert_eq!(locale("fil").code(), "fil");
    }

    #[test]
    fn test_parse_region_codes() {
        assert_eq!(locale("pt-BR").code(), "pt-BR");
        assert_eq!(locale("zh_Hant").code(), "zh-Hant");
    }

    #[test]
    fn test_parse_rejects_invalid_codes() {
        assert!(Locale::parse("").is_err());
        assert!(Locale::parse("f").is_err());
        assert!(Locale::parse("french").is_err());
        assert!(Locale::parse("f1").is_err());
        assert!(Locale::parse("pt-").is_err());
        assert!(Locale::parse("pt-B!").is_err());
    }

    #[test]
    fn test_source_key_is_never_a_locale() {
        assert!(matches!(
            Locale::parse("source"),
            Err(TranslationError::InvalidLocale(_))
        ));
        assert!(Locale::parse("SOURCE").is_err());
    }

    #[test]
    fn test_parse_list_dedupes_and_keeps_order() {
        let locales = parse_list("fr, de,fr,,es").expect("valid list");
        let codes: Vec<&str> = locales.iter().map(Locale::code).collect();
        assert_eq!(codes, vec!["fr", "de", "es"]);
    }

    #[test]
    fn test_parse_list_propagates_errors() {
        assert!(parse_list("fr,??").is_err());
    }

    #[test]
    fn test_locale_serde_uses_plain_string() {
        let json = serde_json::to_string(&locale("fr")).expect("serialize");
        assert_eq!(json, "\"fr\"");
        let back: Locale = serde_json::from_str("\"de\"").expect("deserialize");
        assert_eq!(back, locale("de"));
        assert!(serde_json::from_str::<Locale>("\"source\"").is_err());
    }

    #[test]
    fn test_default_locale_set() {
        let set = LocaleSet::default();
        assert_eq!(set.source(), &locale("en"));
        assert_eq!(set.translatable(), vec![locale("fr"), locale("de")]);
    }

    #[test]
    fn test_locale_set_accepts() {
        let set = LocaleSet::default();
        assert!(set.accepts(&locale("fr")));
        assert!(set.accepts(&locale("de")));
        assert!(!set.accepts(&locale("en")));
        assert!(!set.accepts(&locale("es")));
    }

    #[test]
    fn test_locale_set_adds_missing_source() {
        let set = LocaleSet::new(locale("en"), vec![locale("fr")]);
        assert_eq!(set.available(), &[locale("en"), locale("fr")]);
        assert_eq!(set.translatable(), vec![locale("fr")]);
    }
}
