//! Deployment environment.

use crate::error::StrataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The environment an application runs in.
///
/// The environment decides how much the terminal responder reveals about a
/// failure: outside of production the full error detail is rendered, in
/// production only the status reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development. Error details are exposed.
    #[default]
    Development,
    /// Production. Error details are hidden.
    Production,
    /// Automated tests. The default error reporter stays quiet.
    Test,
}

impl Environment {
    /// Returns `true` for [`Environment::Production`].
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    /// Reads the environment from the named variable.
    ///
    /// Missing or unrecognised values fall back to development.
    #[must_use]
    pub fn from_env_var(name: &str) -> Self {
        std::env::var(name)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" | "testing" => Ok(Self::Test),
            other => Err(StrataError::invalid_argument(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}
