//! Configuration management for node authentication.
//!
//! Configuration is loaded from TOML. Every section falls back to its
//! defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Length of an uncompressed P-256 public key without the SEC1 prefix.
pub const ROOT_PUBLIC_KEY_LEN: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub element: ElementConfig,
    pub trust: TrustConfig,
    pub logging: LoggingConfig,
}

/// Bounds applied to every secure element call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementConfig {
    /// Upper bound on a single secure element operation, in milliseconds.
    pub operation_timeout_ms: u64,
    /// Attempts made for an operation failing with a communication error.
    pub max_attempts: u32,
}

impl Default for ElementConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 2_000,
            max_attempts: 3,
        }
    }
}

/// Root of trust supplied out of band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Root CA public key as 128 hex characters (X || Y).
    pub root_public_key: Option<String>,
}

impl TrustConfig {
    /// Decode the configured root CA public key, if any.
    pub fn root_public_key_bytes(&self) -> crate::Result<Option<[u8; ROOT_PUBLIC_KEY_LEN]>> {
        let Some(encoded) = &self.root_public_key else {
            return Ok(None);
        };

        let bytes = hex::decode(encoded.trim())?;
        let key: [u8; ROOT_PUBLIC_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            crate::Error::Config(format!(
                "trust.root_public_key must be {} bytes, got {}",
                ROOT_PUBLIC_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Some(key))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.element.operation_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "element.operation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.element.max_attempts == 0 {
            return Err(crate::Error::Config(
                "element.max_attempts must be at least 1".to_string(),
            ));
        }
        self.trust.root_public_key_bytes()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.element.operation_timeout_ms, 2_000);
        assert_eq!(config.element.max_attempts, 3);
        assert!(config.trust.root_public_key.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let key = "ab".repeat(64);
        let config = Config::parse(&format!(
            r#"
            [element]
            operation_timeout_ms = 500
            max_attempts = 1

            [trust]
            root_public_key = "{key}"

            [logging]
            level = "debug"
            json = true
            "#
        ))
        .unwrap();

        assert_eq!(config.element.operation_timeout_ms, 500);
        assert_eq!(config.element.max_attempts, 1);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.trust.root_public_key_bytes().unwrap(),
            Some([0xAB; ROOT_PUBLIC_KEY_LEN])
        );
    }

    #[test]
    fn test_reject_short_root_key() {
        let result = Config::parse(
            r#"
            [trust]
            root_public_key = "abcd"
            "#,
        );
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_reject_non_hex_root_key() {
        let result = Config::parse(
            r#"
            [trust]
            root_public_key = "zz"
            "#,
        );
        assert!(matches!(result, Err(crate::Error::Hex(_))));
    }

    #[test]
    fn test_reject_zero_timeout() {
        let result = Config::parse(
            r#"
            [element]
            operation_timeout_ms = 0
            "#,
        );
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_reject_zero_attempts() {
        let result = Config::parse(
            r#"
            [element]
            max_attempts = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_missing_file() {
        let result = Config::from_file("/nonexistent/nodeauth.toml");
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
