use serde::Deserialize;
use skylight_sdk::DEFAULT_CREDENTIALS_PATH;

/// Defaults read from `SKYTOOL__*` environment variables. Command-line flags
/// win over these.
#[derive(Debug, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    #[serde(default)]
    pub max_payload_bytes: Option<usize>,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            max_payload_bytes: None,
            max_in_flight: None,
        }
    }
}

impl ToolConfig {
    pub fn from_env() -> Self {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("SKYTOOL").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map(ToolConfig::normalize)
            .unwrap_or_else(|_| ToolConfig::default())
    }

    fn normalize(mut self) -> Self {
        let trimmed = self.credentials_path.trim();
        self.credentials_path = if trimmed.is_empty() {
            default_credentials_path()
        } else {
            trimmed.to_string()
        };
        self.max_payload_bytes = self.max_payload_bytes.filter(|bytes| *bytes > 0);
        self.max_in_flight = self.max_in_flight.filter(|n| *n > 0);
        self
    }
}

fn default_credentials_path() -> String {
    DEFAULT_CREDENTIALS_PATH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_blank_and_zero_values() {
        let cfg = ToolConfig {
            credentials_path: "   ".into(),
            max_payload_bytes: Some(0),
            max_in_flight: Some(4),
        }
        .normalize();
        assert_eq!(cfg.credentials_path, DEFAULT_CREDENTIALS_PATH);
        assert_eq!(cfg.max_payload_bytes, None);
        assert_eq!(cfg.max_in_flight, Some(4));
    }
}
