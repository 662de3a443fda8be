use std::{path::Path, time::Duration};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::{catalog::DEFAULT_SEARCH_LIMIT, error::ConfigError, search::DEFAULT_DEBOUNCE};

pub const CONFIG_FILE: &str = "card-ledger.toml";
const ENV_PREFIX: &str = "CARD_LEDGER";

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub catalog_source: String,
    #[serde(alias = "databaseUrl", alias = "databaseurl")]
    pub database_url: Option<String>,
    pub api_key: Option<String>,
    pub roster_file: Option<String>,
    pub search_debounce_ms: u64,
    pub search_limit: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_source: "cardDatabase/cardMetaData.json".to_owned(),
            database_url: None,
            api_key: None,
            roster_file: None,
            search_debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            search_limit: DEFAULT_SEARCH_LIMIT,
            log_filter: "info".to_owned(),
        }
    }
}

impl Settings {
    /// Settings from `card-ledger.toml` in `dir` (if present) and the
    /// `CARD_LEDGER_*` environment.
    pub fn new(dir: &Path) -> Result<Self, ConfigError> {
        Self::load_from(&dir.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::build(path, None)
    }

    fn build(path: &Path, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        let settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Store base URL without its trailing slash. Blank counts as unset.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            vars.iter()
                .map(|&(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        )
    }

    mod defaults {
        use super::*;

        #[test]
        fn test_load_no_files() {
            let dir = tempdir().unwrap();
            let settings = Settings::build(&dir.path().join(CONFIG_FILE), env(&[])).unwrap();
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.search_debounce(), Duration::from_millis(200));
            assert_eq!(settings.search_limit, 40);
            assert_eq!(settings.database_url(), None);
        }
    }

    mod project_file {
        use super::*;

        #[test]
        fn test_load_toml() {
            let dir = tempdir().unwrap();
            fs::write(
                dir.path().join(CONFIG_FILE),
                "database_url = \"https://cards.example.com/\"\napi_key = \"k\"\nsearch_limit = 80\n",
            )
            .unwrap();
            let settings = Settings::build(&dir.path().join(CONFIG_FILE), env(&[])).unwrap();
            assert_eq!(settings.database_url(), Some("https://cards.example.com"));
            assert_eq!(settings.api_key(), Some("k"));
            assert_eq!(settings.search_limit, 80);
            assert_eq!(settings.log_filter, "info");
        }

        #[test]
        fn test_camel_case_database_url() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(CONFIG_FILE), "databaseUrl = \"https://db.example.com\"\n").unwrap();
            let settings = Settings::build(&dir.path().join(CONFIG_FILE), env(&[])).unwrap();
            assert_eq!(settings.database_url(), Some("https://db.example.com"));
        }

        #[test]
        fn test_invalid_toml() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(CONFIG_FILE), "search_limit = = 3").unwrap();
            let result = Settings::build(&dir.path().join(CONFIG_FILE), env(&[]));
            assert!(matches!(result, Err(ConfigError::Config(_))));
        }
    }

    mod priority {
        use super::*;

        #[test]
        fn test_env_overrides_file() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(CONFIG_FILE), "search_debounce_ms = 50\nlog_filter = \"warn\"\n").unwrap();
            let settings = Settings::build(
                &dir.path().join(CONFIG_FILE),
                env(&[
                    ("CARD_LEDGER_SEARCH_DEBOUNCE_MS", "10"),
                    ("CARD_LEDGER_ROSTER_FILE", "roster"),
                ]),
            )
            .unwrap();
            assert_eq!(settings.search_debounce(), Duration::from_millis(10));
            assert_eq!(settings.roster_file.as_deref(), Some("roster"));
            assert_eq!(settings.log_filter, "warn");
        }

        #[test]
        fn test_blank_values_count_as_unset() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(CONFIG_FILE), "database_url = \" / \"\napi_key = \"\"\n").unwrap();
            let settings = Settings::build(&dir.path().join(CONFIG_FILE), env(&[])).unwrap();
            assert_eq!(settings.database_url(), None);
            assert_eq!(settings.api_key(), None);
        }
    }
}
