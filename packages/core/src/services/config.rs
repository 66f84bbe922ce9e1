//! Engine Configuration
//!
//! Tunables shared by the predicate builder and the query engine.
//!
//! | Setting | Env var | Default |
//! |---------|---------|---------|
//! | `max_in_elements` | `CRITERIA_MAX_IN_ELEMENTS` | `100` |
//! | `escape_char` | `CRITERIA_ESCAPE_CHAR` | `\` |

use crate::services::error::EngineError;
use serde::{Deserialize, Serialize};

/// Largest IN list emitted before splitting
pub const DEFAULT_MAX_IN_ELEMENTS: usize = 100;

/// Default LIKE escape character
pub const DEFAULT_ESCAPE_CHAR: char = '\\';

pub const MAX_IN_ELEMENTS_ENV: &str = "CRITERIA_MAX_IN_ELEMENTS";
pub const ESCAPE_CHAR_ENV: &str = "CRITERIA_ESCAPE_CHAR";

/// Configuration for predicate building
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Values per IN list (default: 100)
    pub max_in_elements: usize,
    /// LIKE escape character (default: `\`)
    pub escape_char: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_elements: DEFAULT_MAX_IN_ELEMENTS,
            escape_char: DEFAULT_ESCAPE_CHAR,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `CRITERIA_*` environment variables
    ///
    /// Unparsable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_in_elements = std::env::var(MAX_IN_ELEMENTS_ENV)
            .ok()
            .and_then(|v| match v.trim().parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!(value = %v, "Ignoring invalid {}", MAX_IN_ELEMENTS_ENV);
                    None
                }
            })
            .unwrap_or(defaults.max_in_elements);
        let escape_char = std::env::var(ESCAPE_CHAR_ENV)
            .ok()
            .and_then(|v| {
                let mut chars = v.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => {
                        tracing::warn!(value = %v, "Ignoring invalid {}", ESCAPE_CHAR_ENV);
                        None
                    }
                }
            })
            .unwrap_or(defaults.escape_char);

        Self {
            max_in_elements,
            escape_char,
        }
    }

    /// Reject an empty IN-list limit and unusable escape characters
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_in_elements == 0 {
            return Err(EngineError::invalid_argument(
                "max_in_elements must be greater than zero",
            ));
        }
        validate_escape_char(self.escape_char)
    }
}

/// Escape characters must survive pattern construction unchanged
///
/// `%` and `_` are LIKE wildcards. Whitespace is collapsed into `%`, and
/// characters with a distinct lower-case form are folded along with the
/// pattern, so neither would still escape afterwards.
pub fn validate_escape_char(escape_char: char) -> Result<(), EngineError> {
    if escape_char == '%' || escape_char == '_' {
        return Err(EngineError::invalid_argument(format!(
            "Escape character '{}' is a LIKE wildcard",
            escape_char
        )));
    }
    if escape_char.is_whitespace() {
        return Err(EngineError::invalid_argument(
            "Escape character must not be whitespace",
        ));
    }
    if escape_char.to_lowercase().ne(std::iter::once(escape_char)) {
        return Err(EngineError::invalid_argument(format!(
            "Escape character '{}' changes under case folding",
            escape_char
        )));
    }
    Ok(())
}
