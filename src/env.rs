//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment, read from the
//! `GRAPHHUB_ENV` environment variable:
//!
//! - `test` - test mode (config and daemon files under the crate's `tmp/`)
//! - `development` or `dev` - development mode
//! - anything else or unset - production mode

use std::path::{Path, PathBuf};

/// Runtime environment for the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect the current environment from `GRAPHHUB_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("GRAPHHUB_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` in the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` in the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Returns `true` in the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Data directory for launched windows under `root`.
    ///
    /// Production uses `root/data`, every other environment `root/data-{name}`.
    #[must_use]
    pub fn data_dir(self, root: &Path) -> PathBuf {
        if self.is_production() {
            root.join("data")
        } else {
            root.join(format!("data-{self}"))
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience check for `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Test.to_string(), "test");
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse(Some("test")), Environment::Test);
        assert_eq!(Environment::parse(Some("dev")), Environment::Development);
        assert_eq!(Environment::parse(Some("development")), Environment::Development);
        assert_eq!(Environment::parse(Some("staging")), Environment::Production);
        assert_eq!(Environment::parse(None), Environment::Production);
    }

    #[test]
    fn test_environment_is_methods() {
        assert!(Environment::Test.is_test());
        assert!(!Environment::Test.is_production());
        assert!(Environment::Development.is_development());
        assert!(Environment::Production.is_production());
    }

    #[test]
    fn test_data_dir_is_scoped_outside_production() {
        let root = Path::new("/cfg");
        assert_eq!(Environment::Production.data_dir(root), PathBuf::from("/cfg/data"));
        assert_eq!(Environment::Development.data_dir(root), PathBuf::from("/cfg/data-development"));
        assert_eq!(Environment::Test.data_dir(root), PathBuf::from("/cfg/data-test"));
    }
}
