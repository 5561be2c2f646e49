use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{job::AnalysisParameters, PivotError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
    /// Optional wall-clock ceiling on top of the attempt bound.
    pub wall_clock_limit_ms: Option<u64>,
    pub update_capacity: usize,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn wall_clock_limit(&self) -> Option<Duration> {
        self.wall_clock_limit_ms.map(Duration::from_millis)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_attempts: 200,
            wall_clock_limit_ms: None,
            update_capacity: 256,
        }
    }
}

/// Values used for a submission when the caller does not override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisDefaults {
    pub depth: u32,
    pub max_pivots: u32,
    pub swing_threshold_cp: u32,
    pub min_ply_gap: u32,
    pub multipv: u32,
}

impl AnalysisDefaults {
    pub fn parameters(&self, pgn: impl Into<String>) -> AnalysisParameters {
        AnalysisParameters {
            pgn: pgn.into(),
            depth: self.depth,
            max_pivots: self.max_pivots,
            swing_threshold_cp: self.swing_threshold_cp,
            min_ply_gap: self.min_ply_gap,
            multipv: self.multipv,
        }
    }
}

impl Default for AnalysisDefaults {
    fn default() -> Self {
        Self {
            depth: AnalysisParameters::DEFAULT_DEPTH,
            max_pivots: AnalysisParameters::DEFAULT_MAX_PIVOTS,
            swing_threshold_cp: AnalysisParameters::DEFAULT_SWING_THRESHOLD_CP,
            min_ply_gap: AnalysisParameters::DEFAULT_MIN_PLY_GAP,
            multipv: AnalysisParameters::DEFAULT_MULTIPV,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PivotConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub analysis: AnalysisDefaults,
    #[serde(default)]
    pub ops: OpsConfig,
}

impl PivotConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            PivotError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            PivotError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            return Err(PivotError::Configuration(
                "api.base_url must be an http(s) URL".into(),
            ));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(PivotError::Configuration(
                "api.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.polling.max_attempts == 0 {
            return Err(PivotError::Configuration(
                "polling.max_attempts must be greater than zero".into(),
            ));
        }
        // one Queued update, one per status response, one TimedOut marker
        let updates_per_run = (self.polling.max_attempts as usize).saturating_add(2);
        if self.polling.update_capacity < updates_per_run {
            return Err(PivotError::Configuration(format!(
                "polling.update_capacity must be at least {updates_per_run} (max_attempts + 2)"
            )));
        }
        if self.polling.wall_clock_limit_ms == Some(0) {
            return Err(PivotError::Configuration(
                "polling.wall_clock_limit_ms must be greater than zero when set".into(),
            ));
        }
        // A placeholder record lets the shared range checks cover the defaults.
        self.analysis
            .parameters("*")
            .validate()
            .map_err(|err| PivotError::Configuration(format!("analysis defaults: {err}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_pivot_config_from_file() {
        let temp_path = std::env::temp_dir().join("pivot-config-test.toml");
        let config = PivotConfig {
            api: ApiConfig {
                base_url: "https://coach.example.org".into(),
                request_timeout_ms: 10_000,
            },
            polling: PollingConfig {
                interval_ms: 250,
                max_attempts: 40,
                wall_clock_limit_ms: Some(60_000),
                update_capacity: 64,
            },
            analysis: AnalysisDefaults {
                depth: 18,
                ..AnalysisDefaults::default()
            },
            ops: OpsConfig {
                log_level: "debug".into(),
            },
        };

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = PivotConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded, config);
        assert_eq!(loaded.polling.interval(), Duration::from_millis(250));
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: PivotConfig = toml::from_str("[ops]\nlog_level = \"warn\"\n").expect("parse");
        assert_eq!(config.polling.max_attempts, 200);
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = PivotConfig::default();
        assert!(config.validate().is_ok());

        config.api.base_url = "localhost:8000".into();
        assert!(config.validate().is_err());
        config.api.base_url = "http://localhost:8000".into();
        config.polling.max_attempts = 0;
        assert!(config.validate().is_err());
        config.polling.max_attempts = 200;
        config.polling.update_capacity = 201;
        assert!(config.validate().is_err());
        config.polling.update_capacity = 202;
        assert!(config.validate().is_ok());
        config.polling.wall_clock_limit_ms = Some(0);
        assert!(config.validate().is_err());
        config.polling.wall_clock_limit_ms = None;
        config.analysis.depth = 2;
        assert!(config.validate().is_err());
        config.analysis.depth = 14;
        assert!(config.validate().is_ok());
    }
}
