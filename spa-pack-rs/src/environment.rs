use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process-wide variable that selects the build mode.
pub const MODE_ENV_VAR: &str = "NODE_ENV";

/// Build mode. Chosen once when a build starts and threaded explicitly through
/// every stage; nothing consults the process environment after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildEnvironment {
    #[default]
    Development,
    Production,
}

impl BuildEnvironment {
    /// Reads `NODE_ENV`. Unset or unrecognized values select development.
    pub fn from_env() -> Self {
        match std::env::var(MODE_ENV_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                log::warn!("Ignoring unrecognized {MODE_ENV_VAR}={value}, using development");
                Self::Development
            }),
            Err(_) => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for BuildEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "production" | "prod" => Self::Production,
            _ => return Err(format!("Unsupported build environment: {s}")),
        })
    }
}

impl fmt::Display for BuildEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("prod".parse(), Ok(BuildEnvironment::Production));
        assert_eq!(" Production ".parse(), Ok(BuildEnvironment::Production));
        assert_eq!("dev".parse(), Ok(BuildEnvironment::Development));
        assert!("staging".parse::<BuildEnvironment>().is_err());
    }
}
