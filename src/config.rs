use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    pub url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base delay between attempts; doubles per retry. `0` disables waiting.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_api_key_env() -> String {
    "TOXIT_SCORING_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_ms() -> u64 {
    1000
}

impl ScoringConfig {
    /// Reads the endpoint key from the configured environment variable.
    ///
    /// A missing variable yields an empty key; the endpoint decides whether
    /// that is acceptable.
    pub fn api_key(&self) -> String {
        std::env::var(&self.api_key_env).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_root")]
    pub root: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            root: default_collector_root(),
        }
    }
}

fn default_collector_root() -> PathBuf {
    PathBuf::from("./snapshots")
}

const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_BACKOFF_MS: u64 = 60_000;

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.scoring.url.trim().is_empty() {
        anyhow::bail!("scoring.url must not be empty");
    }

    if config.scoring.batch_size == 0 {
        anyhow::bail!("scoring.batch_size must be > 0");
    }

    if config.scoring.timeout_secs == 0 || config.scoring.timeout_secs > MAX_TIMEOUT_SECS {
        anyhow::bail!(
            "scoring.timeout_secs must be between 1 and {}",
            MAX_TIMEOUT_SECS
        );
    }

    if config.scoring.backoff_ms > MAX_BACKOFF_MS {
        anyhow::bail!("scoring.backoff_ms must be <= {}", MAX_BACKOFF_MS);
    }

    if config.scheduler.poll_interval_secs == 0 {
        anyhow::bail!("scheduler.poll_interval_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/toxit.sqlite"

[scoring]
url = "http://localhost:8080/api/mhs"
"#;

    #[test]
    fn defaults_fill_optional_sections() {
        let config = parse_config(MINIMAL).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.scoring.batch_size, 100);
        assert_eq!(config.scoring.timeout_secs, 30);
        assert_eq!(config.scoring.backoff_ms, 1000);
        assert_eq!(config.scoring.api_key_env, "TOXIT_SCORING_API_KEY");
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.collector.root, PathBuf::from("./snapshots"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let content = format!("{}batch_size = 0\n", MINIMAL);
        let config = parse_config(&content).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let content = format!("{}\n[scheduler]\npoll_interval_secs = 0\n", MINIMAL);
        let config = parse_config(&content).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn scoring_timeout_bounds() {
        for value in ["0", "3601"] {
            let content = format!("{}timeout_secs = {}\n", MINIMAL, value);
            let config = parse_config(&content).unwrap();
            let err = validate(&config).unwrap_err();
            assert!(err.to_string().contains("timeout_secs"), "value {}", value);
        }

        let content = format!("{}timeout_secs = 1\n", MINIMAL);
        validate(&parse_config(&content).unwrap()).unwrap();
    }

    #[test]
    fn oversized_backoff_is_rejected() {
        let content = format!("{}backoff_ms = 18446744073709551615\n", MINIMAL);
        let config = parse_config(&content);
        // Out of range for TOML integers or for the bound, never accepted
        assert!(config.map(|c| validate(&c).is_err()).unwrap_or(true));

        let content = format!("{}backoff_ms = 60001\n", MINIMAL);
        let err = validate(&parse_config(&content).unwrap()).unwrap_err();
        assert!(err.to_string().contains("backoff_ms"));

        let content = format!("{}backoff_ms = 0\n", MINIMAL);
        validate(&parse_config(&content).unwrap()).unwrap();
    }

    #[test]
    fn missing_scoring_section_fails_to_parse() {
        let content = "[db]\npath = \"x.sqlite\"\n";
        assert!(parse_config(content).is_err());
    }
}
