use url::Url;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - API base URL parses and uses http(s)
/// - Realtime URL parses and uses ws(s)
/// - Size limits are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let base = Url::parse(&config.api.base_url)
        .map_err(|e| ConfigError::ValidationError(format!("api.base_url: {}", e)))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "api.base_url must be http(s), got {}",
            base.scheme()
        )));
    }

    let realtime = Url::parse(&config.realtime.url)
        .map_err(|e| ConfigError::ValidationError(format!("realtime.url: {}", e)))?;
    if !matches!(realtime.scheme(), "ws" | "wss") {
        return Err(ConfigError::ValidationError(format!(
            "realtime.url must be ws(s), got {}",
            realtime.scheme()
        )));
    }

    if config.limits.max_file_mb == 0 {
        return Err(ConfigError::ValidationError(
            "limits.max_file_mb cannot be 0".to_string(),
        ));
    }
    if config.limits.max_video_mb == 0 {
        return Err(ConfigError::ValidationError(
            "limits.max_video_mb cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, LimitsConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let config = Config {
            api: ApiConfig {
                base_url: "not a url".to_string(),
                ..ApiConfig::default()
            },
            ..Config::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_wrong_realtime_scheme() {
        let mut config = Config::default();
        config.realtime.url = "https://api.markpress.io/ws".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_limit_fails() {
        let config = Config {
            limits: LimitsConfig {
                max_file_mb: 0,
                max_video_mb: 500,
            },
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
