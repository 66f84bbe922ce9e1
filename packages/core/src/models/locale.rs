//! Locale-Aware Case Folding
//!
//! Case-insensitive matching lower-cases both sides of a comparison. Naive
//! case folding is locale dependent:
//!
//! - **Turkish / Azerbaijani**: dotted `İ`/`i` and dotless `I`/`ı` are distinct
//!   letters, so `"QUIT"` lower-cases to `"quıt"`
//! - **German**: `ß` upper-cases to `SS`, which does not lower-case back
//!
//! Comparisons therefore always lower-case (never upper-case) with the
//! caller's locale.
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::models::Locale;
//!
//! let tr = Locale::new("tr", Some("TR"));
//! assert_eq!(tr.to_lowercase("QUIT"), "qu\u{131}t");
//!
//! let en = Locale::english();
//! assert_eq!(en.to_lowercase("QUIT"), "quit");
//! ```

use crate::models::adapters::FormatError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Environment variables consulted for the system default, in order
const LOCALE_ENV_VARS: &[&str] = &["LC_ALL", "LC_MESSAGES", "LANG"];

/// A language with an optional country, e.g. `tr-TR`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    country: Option<String>,
}

impl Locale {
    /// Create a locale; the language is normalized to lower case and the
    /// country to upper case
    pub fn new(language: impl AsRef<str>, country: Option<&str>) -> Self {
        Self {
            language: language.as_ref().to_ascii_lowercase(),
            country: country
                .filter(|c| !c.is_empty())
                .map(|c| c.to_ascii_uppercase()),
        }
    }

    pub fn english() -> Self {
        Self::new("en", None)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    /// Resolve the process-wide default locale
    ///
    /// Reads `LC_ALL`, `LC_MESSAGES` and `LANG` in that order; falls back to
    /// English. Resolved on every call, never cached.
    pub fn system_default() -> Self {
        LOCALE_ENV_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.trim().is_empty())
            .and_then(|v| Self::from_language_tag(&v).ok())
            .unwrap_or_else(Self::english)
    }

    /// Parse BCP-47 (`tr-TR`) or POSIX (`tr_TR.UTF-8@euro`) forms
    ///
    /// `C` and `POSIX` resolve to English.
    pub fn from_language_tag(tag: &str) -> Result<Self, FormatError> {
        let tag = tag.trim();
        let base = tag
            .split(['.', '@'])
            .next()
            .unwrap_or_default();
        if base.eq_ignore_ascii_case("C") || base.eq_ignore_ascii_case("POSIX") {
            return Ok(Self::english());
        }

        let mut parts = base.split(['-', '_']);
        let language = parts.next().unwrap_or_default();
        if language.is_empty() || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FormatError::invalid_locale(tag));
        }
        let country = parts.next();
        if let Some(c) = country {
            if !c.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                return Err(FormatError::invalid_locale(tag));
            }
        }
        Ok(Self::new(language, country))
    }

    /// BCP-47 language tag, e.g. `de-DE`
    pub fn to_language_tag(&self) -> String {
        match &self.country {
            Some(country) => format!("{}-{}", self.language, country),
            None => self.language.clone(),
        }
    }

    /// Lower-case `s` following this locale's rules
    pub fn to_lowercase(&self, s: &str) -> String {
        if self.has_dotless_i() {
            let mut out = String::with_capacity(s.len());
            for c in s.chars() {
                match c {
                    'I' => out.push('\u{131}'),
                    '\u{130}' => out.push('i'),
                    _ => out.extend(c.to_lowercase()),
                }
            }
            out
        } else {
            s.to_lowercase()
        }
    }

    fn has_dotless_i(&self) -> bool {
        matches!(self.language.as_str(), "tr" | "az")
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::system_default()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_language_tag())
    }
}

impl FromStr for Locale {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_language_tag(s)
    }
}

impl Serialize for Locale {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_language_tag())
    }
}

impl<'de> Deserialize<'de> for Locale {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Self::from_language_tag(&tag).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turkish_dotless_i() {
        let tr = Locale::new("tr", Some("TR"));
        let en = Locale::english();

        assert_ne!(tr.to_lowercase("QUIT"), "quit");
        assert_eq!(en.to_lowercase("QUIT"), "quit");
        assert_eq!(tr.to_lowercase("\u{130}STANBUL"), "istanbul");
    }

    #[test]
    fn test_german_sharp_s() {
        let de = Locale::new("de", Some("DE"));
        let word = "schei\u{df}e";

        // ß upper-cases to SS, which cannot fold back
        assert_ne!(de.to_lowercase(&word.to_uppercase()), word);
        assert_eq!(de.to_lowercase("SCHEI\u{df}E"), word);
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            Locale::from_language_tag("tr_TR.UTF-8").unwrap(),
            Locale::new("tr", Some("TR"))
        );
        assert_eq!(
            Locale::from_language_tag("de-de").unwrap().to_language_tag(),
            "de-DE"
        );
        assert_eq!(Locale::from_language_tag("C").unwrap(), Locale::english());
        assert!(Locale::from_language_tag("").is_err());
        assert!(Locale::from_language_tag("12-x").is_err());
    }

    #[test]
    fn test_serde_as_tag() {
        let locale = Locale::new("en", Some("GB"));
        let json = serde_json::to_string(&locale).unwrap();
        assert_eq!(json, "\"en-GB\"");
        let back: Locale = serde_json::from_str(&json).unwrap();
        assert_eq!(back, locale);
    }
}
