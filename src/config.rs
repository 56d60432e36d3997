use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::core::MatchingError;
use crate::models::{AgentId, Market, PreferenceList, Retention, SearchPolicy};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SearchSettings {
    #[validate(range(min = 1, max = 8))]
    #[serde(default = "default_population")]
    pub population: usize,
    #[serde(default = "default_distinguished")]
    pub distinguished: String,
    /// True ranking of the distinguished agent; empty means `c1..cn`
    #[serde(default)]
    pub truthful: Vec<String>,
    #[serde(default = "default_exhaustive_threshold")]
    pub exhaustive_threshold: usize,
    #[validate(range(min = 1))]
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[validate(range(min = 1))]
    pub beneficial_cap: Option<u64>,
    #[validate(range(min = 1))]
    pub max_combinations: Option<u64>,
    #[serde(default)]
    pub retain: Retention,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            population: default_population(),
            distinguished: default_distinguished(),
            truthful: Vec::new(),
            exhaustive_threshold: default_exhaustive_threshold(),
            sample_size: default_sample_size(),
            seed: default_seed(),
            beneficial_cap: None,
            max_combinations: None,
            retain: Retention::default(),
        }
    }
}

fn default_population() -> usize { 3 }
fn default_distinguished() -> String { "s1".to_string() }
fn default_exhaustive_threshold() -> usize { 3 }
fn default_sample_size() -> usize { 6 }
fn default_seed() -> u64 { 42 }

impl SearchSettings {
    pub fn policy(&self) -> SearchPolicy {
        SearchPolicy {
            exhaustive_threshold: self.exhaustive_threshold,
            sample_size: self.sample_size,
            seed: self.seed,
            beneficial_cap: self.beneficial_cap,
            max_combinations: self.max_combinations,
        }
    }

    pub fn market(&self) -> Market {
        Market::with_population(self.population)
    }

    pub fn distinguished_id(&self) -> AgentId {
        AgentId::from(self.distinguished.as_str())
    }

    /// The configured true list, checked against the market's receivers
    pub fn truthful_list(&self, market: &Market) -> Result<PreferenceList, MatchingError> {
        let list = if self.truthful.is_empty() {
            PreferenceList::new(market.receivers().to_vec())
        } else {
            PreferenceList::from_ids(self.truthful.iter().map(String::as_str))
        };
        list.check_permutation_of(&self.distinguished_id(), market.receivers())?;
        Ok(list)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_results_path")]
    pub results_path: PathBuf,
    #[serde(default = "default_first_case_path")]
    pub first_case_path: PathBuf,
    /// DOT file for the first beneficial case, skipped when unset
    #[serde(default)]
    pub diagram_path: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_path: default_results_path(),
            first_case_path: default_first_case_path(),
            diagram_path: None,
        }
    }
}

fn default_results_path() -> PathBuf { PathBuf::from("simulation_results.json") }
fn default_first_case_path() -> PathBuf { PathBuf::from("first_beneficial_case.json") }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

fn environment() -> Environment {
    // e.g., TWOSTAGE__SEARCH__SEED -> search.seed
    //       TWOSTAGE__SEARCH__TRUTHFUL=c2,c1,c3 -> search.truthful
    Environment::with_prefix("TWOSTAGE")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("search.truthful")
}

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with TWOSTAGE__)
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_search_settings() {
        let search = SearchSettings::default();
        assert_eq!(search.population, 3);
        assert_eq!(search.distinguished, "s1");
        assert_eq!(search.exhaustive_threshold, 3);
        assert_eq!(search.sample_size, 6);
        assert_eq!(search.seed, 42);
        assert!(search.validate().is_ok());
        assert_eq!(search.policy(), SearchPolicy::default());
    }

    #[test]
    fn test_default_logging() {
        let logging = LoggingSettings::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "pretty");
    }

    #[test]
    fn test_population_range_validated() {
        let search = SearchSettings {
            population: 12,
            ..SearchSettings::default()
        };
        assert!(search.validate().is_err());
    }

    #[test]
    fn test_default_truthful_list() {
        let search = SearchSettings::default();
        let market = search.market();
        let truthful = search.truthful_list(&market).unwrap();
        assert_eq!(truthful.to_string(), "c1 > c2 > c3");
    }

    #[test]
    fn test_incomplete_truthful_list_rejected() {
        let search = SearchSettings {
            truthful: vec!["c2".to_string(), "c1".to_string()],
            ..SearchSettings::default()
        };
        let market = search.market();
        assert!(matches!(
            search.truthful_list(&market),
            Err(MatchingError::MalformedPreferenceList { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[search]\npopulation = 4\nseed = 7\nbeneficial_cap = 3\nretain = \"beneficial\"\n\n\
             [output]\nresults_path = \"out/results.json\""
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.search.population, 4);
        assert_eq!(settings.search.seed, 7);
        assert_eq!(settings.search.beneficial_cap, Some(3));
        assert_eq!(settings.search.retain, Retention::Beneficial);
        assert_eq!(settings.search.sample_size, 6);
        assert_eq!(settings.output.results_path, PathBuf::from("out/results.json"));
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_truthful_list_from_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[search]\npopulation = 3").unwrap();

        std::env::set_var("TWOSTAGE__SEARCH__TRUTHFUL", "c2,c1,c3");
        let loaded = Settings::load_from(file.path());
        std::env::remove_var("TWOSTAGE__SEARCH__TRUTHFUL");

        let search = loaded.unwrap().search;
        assert_eq!(search.truthful, vec!["c2", "c1", "c3"]);
        let truthful = search.truthful_list(&search.market()).unwrap();
        assert_eq!(truthful.to_string(), "c2 > c1 > c3");
    }
}
