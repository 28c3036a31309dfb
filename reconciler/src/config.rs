use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("gate.max_permits cannot be 0")]
    ZeroPermits,

    #[error("gate.requests_per_minute cannot be 0")]
    ZeroRequestRate,

    #[error("gate.burst cannot be 0")]
    ZeroBurst,

    #[error("upstream.timeout_secs cannot be 0")]
    ZeroTimeout,

    #[error("store.{0} cannot be empty")]
    EmptyStorePath(&'static str),
}

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Zstd1,
    Zstd3,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    Filesystem {
        base_dir: String,
        filename: String,
        #[serde(default)]
        compression: Compression,
    },
    Memory,
}

/// Flight data provider endpoint.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct UpstreamConfig {
    pub url: Url,
    /// Falls back to the `FR24_API_KEY` environment variable when unset.
    pub api_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    15
}

/// Limits on upstream calls. The provider enforces a requests-per-minute
/// ceiling, so both the number of simultaneous calls and the call start rate
/// are bounded.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub max_permits: usize,
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            max_permits: 5,
            requests_per_minute: 30,
            burst: 1,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct NegativeCacheConfig {
    /// 0 disables the negative cache.
    pub ttl_secs: u64,
    pub capacity: u64,
}

impl Default for NegativeCacheConfig {
    fn default() -> Self {
        NegativeCacheConfig {
            ttl_secs: 5,
            capacity: 1000,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub gate: GateConfig,
    pub store: StoreType,
    #[serde(default)]
    pub negative_cache: NegativeCacheConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.gate.max_permits == 0 {
            return Err(ValidationError::ZeroPermits);
        }
        if self.gate.requests_per_minute == 0 {
            return Err(ValidationError::ZeroRequestRate);
        }
        if self.gate.burst == 0 {
            return Err(ValidationError::ZeroBurst);
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }

        if let StoreType::Filesystem {
            base_dir, filename, ..
        } = &self.store
        {
            if base_dir.is_empty() {
                return Err(ValidationError::EmptyStorePath("base_dir"));
            }
            if filename.is_empty() {
                return Err(ValidationError::EmptyStorePath("filename"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
upstream:
    url: https://fr24api.flightradar24.com/api
    api_token: secret
    timeout_secs: 20
gate:
    max_permits: 3
    requests_per_minute: 10
    burst: 2
store:
    type: filesystem
    base_dir: /var/lib/flightcache
    filename: flights.bin
    compression: zstd3
negative_cache:
    ttl_secs: 30
    capacity: 50
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(
            config.upstream.url.as_str(),
            "https://fr24api.flightradar24.com/api"
        );
        assert_eq!(config.upstream.timeout(), Duration::from_secs(20));
        assert_eq!(config.gate.max_permits, 3);
        assert_eq!(
            config.store,
            StoreType::Filesystem {
                base_dir: "/var/lib/flightcache".into(),
                filename: "flights.bin".into(),
                compression: Compression::Zstd3,
            }
        );
        assert_eq!(config.negative_cache.ttl_secs, 30);
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
upstream:
    url: http://127.0.0.1:9000
store:
    type: memory
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.upstream.api_token, None);
        assert_eq!(config.upstream.timeout_secs, 15);
        assert_eq!(config.gate, GateConfig::default());
        assert_eq!(config.negative_cache, NegativeCacheConfig::default());
        assert_eq!(config.store, StoreType::Memory);
    }

    #[test]
    fn test_validation_errors() {
        let base: Config = serde_yaml::from_str(
            r#"
upstream: {url: "http://127.0.0.1:9000"}
store: {type: filesystem, base_dir: /tmp, filename: flights.bin}
"#,
        )
        .unwrap();

        let mut config = base.clone();
        config.gate.max_permits = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroPermits));

        let mut config = base.clone();
        config.gate.requests_per_minute = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroRequestRate));

        let mut config = base.clone();
        config.gate.burst = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroBurst));

        let mut config = base.clone();
        config.upstream.timeout_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroTimeout));

        let mut config = base;
        config.store = StoreType::Filesystem {
            base_dir: "/tmp".into(),
            filename: "".into(),
            compression: Compression::None,
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::EmptyStorePath("filename"))
        );
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
upstream: {url: "not a url"}
store: {type: memory}
"#
            )
            .is_err()
        );

        // Unknown store type
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
upstream: {url: "http://127.0.0.1:9000"}
store: {type: postgres}
"#
            )
            .is_err()
        );

        // Unknown compression
        assert!(serde_yaml::from_str::<Compression>("gzip").is_err());
    }
}
