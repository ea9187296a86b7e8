use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Conversion API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base URL of the conversion service (e.g., "https://api.markpress.io")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default credential attached to credential-gated requests.
    ///
    /// Callers may override this per conversion; it is never persisted by
    /// this crate.
    #[serde(default)]
    pub credential: Option<String>,
    /// Request timeout in seconds (default: 300 - media conversions are slow)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            credential: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.markpress.io".to_string()
}

fn default_timeout() -> u64 {
    300
}

/// Real-time update channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealtimeConfig {
    /// WebSocket URL for job updates (e.g., "wss://api.markpress.io/ws")
    #[serde(default = "default_realtime_url")]
    pub url: String,
    /// Initial reconnect backoff in milliseconds (default: 500)
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Maximum reconnect backoff in milliseconds (default: 30000)
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_realtime_url() -> String {
    "wss://api.markpress.io/ws".to_string()
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

/// Upload size ceilings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum size for document/audio/data files in megabytes (default: 50)
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: u64,
    /// Maximum size for video files in megabytes (default: 500)
    #[serde(default = "default_max_video_mb")]
    pub max_video_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_mb: default_max_file_mb(),
            max_video_mb: default_max_video_mb(),
        }
    }
}

fn default_max_file_mb() -> u64 {
    50
}

fn default_max_video_mb() -> u64 {
    500
}

impl LimitsConfig {
    /// Ceiling for document/audio/data files, in bytes.
    pub fn file_limit_bytes(&self) -> u64 {
        self.max_file_mb * 1024 * 1024
    }

    /// Ceiling for video files, in bytes.
    pub fn video_limit_bytes(&self) -> u64 {
        self.max_video_mb * 1024 * 1024
    }
}

/// Sanitized config for logs and UI surfaces (credential redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub api: SanitizedApiConfig,
    pub realtime: RealtimeConfig,
    pub limits: LimitsConfig,
}

/// Sanitized API config (credential hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedApiConfig {
    pub base_url: String,
    pub credential_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            api: SanitizedApiConfig {
                base_url: config.api.base_url.clone(),
                credential_configured: config.api.credential.is_some(),
                timeout_secs: config.api.timeout_secs,
            },
            realtime: config.realtime.clone(),
            limits: config.limits.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.timeout_secs, 300);
        assert_eq!(config.limits.max_file_mb, 50);
        assert_eq!(config.limits.max_video_mb, 500);
        assert!(config.api.credential.is_none());
    }

    #[test]
    fn test_limit_bytes() {
        let limits = LimitsConfig {
            max_file_mb: 2,
            max_video_mb: 10,
        };
        assert_eq!(limits.file_limit_bytes(), 2 * 1024 * 1024);
        assert_eq!(limits.video_limit_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_sanitized_redacts_credential() {
        let config = Config {
            api: ApiConfig {
                credential: Some("sk-secret".to_string()),
                ..ApiConfig::default()
            },
            ..Config::default()
        };

        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.api.credential_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
