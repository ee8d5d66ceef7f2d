use crate::error::ConfigError;

pub const DEFAULT_TABLE_NAME: &str = "gimong";

/// Settings read once per cold start.
#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub cognito_client_id: String,
    pub cognito_client_secret: Option<String>,
    pub ws_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            table_name: non_empty("TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            cognito_client_id: non_empty("COGNITO_CLIENT_ID")
                .ok_or(ConfigError::Missing("COGNITO_CLIENT_ID"))?,
            cognito_client_secret: non_empty("COGNITO_CLIENT_SECRET"),
            ws_endpoint: non_empty("WS_API_ENDPOINT"),
        })
    }
}

/// Settings for the stream consumer, which only pushes to sockets.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub table_name: String,
    pub ws_endpoint: String,
}

impl StreamConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            table_name: non_empty("TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            ws_endpoint: non_empty("WS_API_ENDPOINT").ok_or(ConfigError::Missing("WS_API_ENDPOINT"))?,
        })
    }
}
