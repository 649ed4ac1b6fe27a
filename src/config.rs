use crate::error::InferenceError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
    time::Duration,
};

/// Port used when a name carries a host but no port.
pub const DEFAULT_REGISTRY_PORT: u16 = 1099;
pub const DEFAULT_REGISTRY_HOST: &str = "localhost";

/// Engine-wide settings owned by a [`crate::context::Context`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Registry host this context publishes its networks under.
    pub host: String,
    pub port: u16,
    /// Directories searched by `Context::load_network`, in order.
    pub search_path: Vec<PathBuf>,
    pub reconnect: ReconnectPolicy,
    pub cache: CacheConfig,
    pub loopy: LoopyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            host: DEFAULT_REGISTRY_HOST.to_string(),
            port: DEFAULT_REGISTRY_PORT,
            search_path: vec![PathBuf::from(".")],
            reconnect: ReconnectPolicy::default(),
            cache: CacheConfig::default(),
            loopy: LoopyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Same defaults, published under a different registry location.
    pub fn at(host: &str, port: u16) -> Self {
        EngineConfig {
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.host.is_empty() || self.host.contains(['/', ':']) {
            return Err(InferenceError::Config(format!(
                "invalid registry host '{}'",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(InferenceError::Config(
                "registry port must be non-zero".to_string(),
            ));
        }
        self.reconnect.validate()?;
        self.cache.validate()?;
        self.loopy.validate()?;
        Ok(())
    }
}

/// How a remote peer is re-contacted after a transport failure.
///
/// `max_attempts` counts reconnections, each followed by one retry of the failed call. The
/// default is exactly one reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: 1,
            backoff: BackoffStrategy::Fixed { delay_ms: 0 },
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), InferenceError> {
        self.backoff.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed {
        delay_ms: u64,
    },
    Linear {
        base_ms: u64,
    },
    Exponential {
        base_ms: u64,
        max_ms: u64,
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Linear { base_ms } => {
                Duration::from_millis(base_ms.saturating_mul(attempt as u64))
            }
            BackoffStrategy::Exponential {
                base_ms,
                max_ms,
                multiplier,
            } => {
                let scaled = *base_ms as f64 * multiplier.powi(attempt as i32 - 1);
                Duration::from_millis(scaled.min(*max_ms as f64) as u64)
            }
        }
    }

    fn validate(&self) -> Result<(), InferenceError> {
        if let BackoffStrategy::Exponential {
            base_ms,
            max_ms,
            multiplier,
        } = self
        {
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(InferenceError::Config(
                    "exponential backoff multiplier must be finite and >= 1".to_string(),
                ));
            }
            if max_ms < base_ms {
                return Err(InferenceError::Config(
                    "exponential backoff max_ms must be >= base_ms".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Settings for [`crate::cache::InterpolatingCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Brackets narrower than this are interpolated instead of evaluated.
    pub close_enough: f64,
    pub error_tolerance: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            close_enough: 0.1,
            error_tolerance: 1e-4,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), InferenceError> {
        if !self.close_enough.is_finite() || self.close_enough <= 0.0 {
            return Err(InferenceError::Config(
                "cache close_enough must be finite and > 0".to_string(),
            ));
        }
        if !self.error_tolerance.is_finite() || self.error_tolerance <= 0.0 {
            return Err(InferenceError::Config(
                "cache error_tolerance must be finite and > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Synchronous sweep settings for loopy networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopyConfig {
    pub max_iterations: usize,
    /// Damping factor in [0, 1). Higher values slow updates and improve stability.
    pub damping: f64,
    /// Convergence threshold on the largest posterior change between sweeps.
    pub convergence_tolerance: f64,
}

impl Default for LoopyConfig {
    fn default() -> Self {
        LoopyConfig {
            max_iterations: 100,
            damping: 0.0,
            convergence_tolerance: 1e-6,
        }
    }
}

impl LoopyConfig {
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.max_iterations == 0 {
            return Err(InferenceError::Config(
                "loopy max_iterations must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(InferenceError::Config(
                "loopy damping must be in [0, 1)".to_string(),
            ));
        }
        if self.convergence_tolerance <= 0.0 || !self.convergence_tolerance.is_finite() {
            return Err(InferenceError::Config(
                "loopy convergence_tolerance must be finite and > 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<EngineConfig, InferenceError>;
    fn save(&self, config: &EngineConfig) -> Result<(), InferenceError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<EngineConfig, InferenceError> {
        tracing::debug!("Attempting to read engine config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(EngineConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn save(&self, config: &EngineConfig) -> Result<(), InferenceError> {
        tracing::debug!("Attempting to write engine config to: {:?}", &self.path);
        config.validate()?;
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect.max_attempts, 1);
        assert_eq!(config.cache.close_enough, 0.1);
        assert_eq!(config.port, DEFAULT_REGISTRY_PORT);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let text = r#"
host = "alpha"

[reconnect]
max_attempts = 2

[reconnect.backoff]
kind = "exponential"
base_ms = 10
max_ms = 50
multiplier = 2.0

[loopy]
damping = 0.5
"#;
        let config: EngineConfig = toml::from_str(text).unwrap();
        assert_eq!(config.host, "alpha");
        assert_eq!(config.port, DEFAULT_REGISTRY_PORT);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.loopy.damping, 0.5);
        assert_eq!(config.loopy.max_iterations, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_delays() {
        let fixed = BackoffStrategy::Fixed { delay_ms: 7 };
        assert_eq!(fixed.delay_for(3), Duration::from_millis(7));

        let linear = BackoffStrategy::Linear { base_ms: 5 };
        assert_eq!(linear.delay_for(1), Duration::from_millis(5));
        assert_eq!(linear.delay_for(3), Duration::from_millis(15));

        let exp = BackoffStrategy::Exponential {
            base_ms: 10,
            max_ms: 50,
            multiplier: 2.0,
        };
        assert_eq!(exp.delay_for(1), Duration::from_millis(10));
        assert_eq!(exp.delay_for(2), Duration::from_millis(20));
        assert_eq!(exp.delay_for(5), Duration::from_millis(50));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.loopy.damping = 1.0;
        assert!(matches!(config.validate(), Err(InferenceError::Config(_))));

        let mut config = EngineConfig::default();
        config.cache.close_enough = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_provider_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("engine.toml"));
        assert_eq!(provider.load().unwrap(), EngineConfig::default());

        let mut config = EngineConfig::at("beta", 2001);
        config.reconnect.backoff = BackoffStrategy::Linear { base_ms: 3 };
        provider.save(&config).unwrap();
        assert_eq!(provider.load().unwrap(), config);
    }
}
