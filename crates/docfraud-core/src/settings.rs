use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::risk::RiskThresholds;

pub const DEFAULT_OPENAI_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_DOCUMENT_API_VERSION: &str = "2023-07-31";
pub const DEFAULT_DOCUMENT_MODEL: &str = "prebuilt-document";

/// Errors raised while assembling [`Settings`].
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required configuration: {}", .names.join(", "))]
    Missing { names: Vec<&'static str> },
    #[error("invalid value `{value}` for {name}")]
    Invalid { name: &'static str, value: String },
    #[error("failed to read configuration source")]
    Source(#[from] config::ConfigError),
}

/// Connection and tuning parameters for both remote services.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub document_endpoint: String,
    pub document_key: String,
    pub document_api_version: String,
    pub document_model: String,
    pub openai_endpoint: String,
    pub openai_key: String,
    pub openai_deployment: String,
    pub openai_api_version: String,
    /// Extra attempts the wire clients make after a transport error or 5xx.
    pub max_retry_attempts: u32,
    pub timeout_secs: u64,
    /// Upper bound on characters forwarded to the completion service.
    pub max_input_chars: usize,
    pub thresholds: RiskThresholds,
}

impl Settings {
    const DOCUMENT_ENDPOINT_ENV: &'static str = "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT";
    const DOCUMENT_KEY_ENV: &'static str = "AZURE_DOCUMENT_INTELLIGENCE_KEY";
    const DOCUMENT_API_VERSION_ENV: &'static str = "AZURE_DOCUMENT_INTELLIGENCE_API_VERSION";
    const DOCUMENT_MODEL_ENV: &'static str = "DOCUMENT_MODEL_ID";
    const OPENAI_ENDPOINT_ENV: &'static str = "AZURE_OPENAI_ENDPOINT";
    const OPENAI_KEY_ENV: &'static str = "AZURE_OPENAI_KEY";
    const OPENAI_DEPLOYMENT_ENV: &'static str = "AZURE_OPENAI_DEPLOYMENT_NAME";
    const OPENAI_API_VERSION_ENV: &'static str = "AZURE_OPENAI_API_VERSION";
    const RETRIES_ENV: &'static str = "MAX_RETRY_ATTEMPTS";
    const TIMEOUT_ENV: &'static str = "TIMEOUT_SECONDS";
    const MAX_INPUT_ENV: &'static str = "MAX_INPUT_CHARS";
    const LOW_MAX_ENV: &'static str = "RISK_LOW_MAX";
    const MEDIUM_MAX_ENV: &'static str = "RISK_MEDIUM_MAX";
    const HIGH_MIN_ENV: &'static str = "RISK_HIGH_MIN";

    /// Load settings from environment variables.
    ///
    /// * `AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT` / `_KEY` (required)
    /// * `AZURE_OPENAI_ENDPOINT` / `_KEY` / `_DEPLOYMENT_NAME` (required)
    /// * `AZURE_OPENAI_API_VERSION` (default: `2024-02-15-preview`)
    /// * `MAX_RETRY_ATTEMPTS` (default: 3), `TIMEOUT_SECONDS` (default: 120)
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_map(std::env::vars().collect())
    }

    const KNOWN_KEYS: [&'static str; 14] = [
        Self::DOCUMENT_ENDPOINT_ENV,
        Self::DOCUMENT_KEY_ENV,
        Self::DOCUMENT_API_VERSION_ENV,
        Self::DOCUMENT_MODEL_ENV,
        Self::OPENAI_ENDPOINT_ENV,
        Self::OPENAI_KEY_ENV,
        Self::OPENAI_DEPLOYMENT_ENV,
        Self::OPENAI_API_VERSION_ENV,
        Self::RETRIES_ENV,
        Self::TIMEOUT_ENV,
        Self::MAX_INPUT_ENV,
        Self::LOW_MAX_ENV,
        Self::MEDIUM_MAX_ENV,
        Self::HIGH_MIN_ENV,
    ];

    /// Layer an optional configuration file underneath the process environment.
    ///
    /// File keys use the same names as the environment variables, in any case.
    /// Only the variables listed above are read from the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut vars = HashMap::new();
        if let Some(path) = file {
            let from_file: HashMap<String, String> = config::Config::builder()
                .add_source(config::File::from(path))
                .build()?
                .try_deserialize()?;
            vars.extend(
                from_file
                    .into_iter()
                    .map(|(key, value)| (key.to_ascii_uppercase(), value)),
            );
        }
        for name in Self::KNOWN_KEYS {
            if let Ok(value) = std::env::var(name) {
                vars.insert(name.to_string(), value);
            }
        }
        Self::from_map(vars)
    }

    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, ConfigurationError> {
        let lookup = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut missing = Vec::new();
        let mut required = |name: &'static str| {
            lookup(name).unwrap_or_else(|| {
                missing.push(name);
                String::new()
            })
        };
        let document_endpoint = required(Self::DOCUMENT_ENDPOINT_ENV);
        let document_key = required(Self::DOCUMENT_KEY_ENV);
        let openai_endpoint = required(Self::OPENAI_ENDPOINT_ENV);
        let openai_key = required(Self::OPENAI_KEY_ENV);
        let openai_deployment = required(Self::OPENAI_DEPLOYMENT_ENV);
        if !missing.is_empty() {
            return Err(ConfigurationError::Missing { names: missing });
        }

        let defaults = RiskThresholds::default();
        let thresholds = RiskThresholds {
            low_max: parse_or(&vars, Self::LOW_MAX_ENV, defaults.low_max)?,
            medium_max: parse_or(&vars, Self::MEDIUM_MAX_ENV, defaults.medium_max)?,
            high_min: parse_or(&vars, Self::HIGH_MIN_ENV, defaults.high_min)?,
        };

        Ok(Self {
            document_endpoint,
            document_key,
            document_api_version: lookup(Self::DOCUMENT_API_VERSION_ENV)
                .unwrap_or_else(|| DEFAULT_DOCUMENT_API_VERSION.to_string()),
            document_model: lookup(Self::DOCUMENT_MODEL_ENV)
                .unwrap_or_else(|| DEFAULT_DOCUMENT_MODEL.to_string()),
            openai_endpoint,
            openai_key,
            openai_deployment,
            openai_api_version: lookup(Self::OPENAI_API_VERSION_ENV)
                .unwrap_or_else(|| DEFAULT_OPENAI_API_VERSION.to_string()),
            max_retry_attempts: parse_or(&vars, Self::RETRIES_ENV, 3)?,
            timeout_secs: parse_or(&vars, Self::TIMEOUT_ENV, 120)?,
            max_input_chars: parse_or(&vars, Self::MAX_INPUT_ENV, 100_000)?,
            thresholds,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigurationError> {
    match vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigurationError::Invalid {
            name,
            value: raw.to_string(),
        }),
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("document_endpoint", &self.document_endpoint)
            .field("document_key", &"<redacted>")
            .field("document_api_version", &self.document_api_version)
            .field("document_model", &self.document_model)
            .field("openai_endpoint", &self.openai_endpoint)
            .field("openai_key", &"<redacted>")
            .field("openai_deployment", &self.openai_deployment)
            .field("openai_api_version", &self.openai_api_version)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_input_chars", &self.max_input_chars)
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn required_vars() -> HashMap<String, String> {
        [
            (Settings::DOCUMENT_ENDPOINT_ENV, "https://doc.example.com/"),
            (Settings::DOCUMENT_KEY_ENV, "doc-key"),
            (Settings::OPENAI_ENDPOINT_ENV, "https://oai.example.com"),
            (Settings::OPENAI_KEY_ENV, "oai-key"),
            (Settings::OPENAI_DEPLOYMENT_ENV, "gpt-4o"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn applies_defaults_for_optional_values() {
        let settings = Settings::from_map(required_vars()).expect("should load settings");
        assert_eq!(settings.openai_api_version, "2024-02-15-preview");
        assert_eq!(settings.document_model, "prebuilt-document");
        assert_eq!(settings.max_retry_attempts, 3);
        assert_eq!(settings.timeout_secs, 120);
        assert_eq!(settings.thresholds, RiskThresholds::default());
    }

    #[test]
    fn reports_every_missing_value() {
        let mut vars = required_vars();
        vars.remove(Settings::OPENAI_KEY_ENV);
        vars.insert(Settings::DOCUMENT_KEY_ENV.into(), "   ".into());
        let err = Settings::from_map(vars).expect_err("missing values should error");
        match err {
            ConfigurationError::Missing { names } => {
                assert_eq!(
                    names,
                    vec![Settings::DOCUMENT_KEY_ENV, Settings::OPENAI_KEY_ENV]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let mut vars = required_vars();
        vars.insert(Settings::TIMEOUT_ENV.into(), "soon".into());
        let err = Settings::from_map(vars).expect_err("bad timeout should error");
        assert!(err.to_string().contains(Settings::TIMEOUT_ENV));
    }

    #[test]
    fn parses_tuning_values() {
        let mut vars = required_vars();
        vars.insert(Settings::RETRIES_ENV.into(), "5".into());
        vars.insert(Settings::TIMEOUT_ENV.into(), "45".into());
        vars.insert(Settings::LOW_MAX_ENV.into(), "0.2".into());
        vars.insert(Settings::OPENAI_API_VERSION_ENV.into(), "2024-07-01".into());
        let settings = Settings::from_map(vars).expect("should parse tuning values");
        assert_eq!(settings.max_retry_attempts, 5);
        assert_eq!(settings.timeout(), Duration::from_secs(45));
        assert!((settings.thresholds.low_max - 0.2).abs() < f64::EPSILON);
        assert_eq!(settings.openai_api_version, "2024-07-01");
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let settings = Settings::from_map(required_vars()).unwrap();
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("doc-key"));
        assert!(!rendered.contains("oai-key"));
    }

    #[test]
    fn environment_overrides_config_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let mut body = String::new();
        for (key, value) in required_vars() {
            body.push_str(&format!("{} = \"{}\"\n", key.to_lowercase(), value));
        }
        body.push_str("timeout_seconds = \"30\"\n");
        file.write_all(body.as_bytes()).unwrap();

        env::set_var(Settings::RETRIES_ENV, "7");
        let settings = Settings::load(Some(file.path()));
        env::remove_var(Settings::RETRIES_ENV);

        let settings = settings.expect("file plus environment should load");
        assert_eq!(settings.openai_deployment, "gpt-4o");
        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.max_retry_attempts, 7);
    }

    #[test]
    fn unrelated_dotted_variables_are_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        for (key, value) in required_vars() {
            writeln!(file, "{key} = \"{value}\"").unwrap();
        }

        env::set_var("npm_config.cache", "/tmp/npm");
        let settings = Settings::load(Some(file.path()));
        env::remove_var("npm_config.cache");

        let settings = settings.expect("dotted variables must not break loading");
        assert_eq!(settings.openai_deployment, "gpt-4o");
    }

    #[test]
    fn environment_wins_over_uppercase_file_keys() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        for (key, value) in required_vars() {
            if key != Settings::OPENAI_DEPLOYMENT_ENV {
                writeln!(file, "{key} = \"{value}\"").unwrap();
            }
        }
        writeln!(file, "{} = \"from-file\"", Settings::OPENAI_DEPLOYMENT_ENV).unwrap();
        writeln!(file, "Max_Retry_Attempts = \"4\"").unwrap();

        env::set_var(Settings::OPENAI_DEPLOYMENT_ENV, "from-env");
        let loaded: Vec<_> = (0..20).map(|_| Settings::load(Some(file.path()))).collect();
        env::remove_var(Settings::OPENAI_DEPLOYMENT_ENV);

        for settings in loaded {
            let settings = settings.expect("uppercase file keys should load");
            assert_eq!(settings.openai_deployment, "from-env");
            assert_eq!(settings.max_retry_attempts, 4);
        }
    }
}
