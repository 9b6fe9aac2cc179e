//! Core configuration: storage location, local identity and auth endpoint.

use serde::Deserialize;

const DEFAULT_AUTH_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";

/// Read an env var as a non-empty trimmed string.
pub fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    pub app_name: String,
    pub storage_path: String,
    /// Identity used when no auth backend is configured.
    pub user_id: String,
    #[serde(default)]
    pub firebase_api_key: Option<String>,
    pub auth_endpoint: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: "VenomVoice".to_string(),
            storage_path: "./data/venom_store".to_string(),
            user_id: "local".to_string(),
            firebase_api_key: None,
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: `VENOM__*` env > `VENOM_CONFIG` file
    /// (default `config/venom.toml`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("VENOM_CONFIG").unwrap_or_else(|_| "config/venom".to_string());
        let defaults = Self::default();
        let built = config::Config::builder()
            .set_default("app_name", defaults.app_name)?
            .set_default("storage_path", defaults.storage_path)?
            .set_default("user_id", defaults.user_id)?
            .set_default("auth_endpoint", defaults.auth_endpoint)?
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("VENOM").separator("__"))
            .build()?;

        let mut loaded: Self = built.try_deserialize()?;
        if loaded.firebase_api_key.is_none() {
            loaded.firebase_api_key = env_opt_string("FIREBASE_API_KEY");
        }
        Ok(loaded)
    }

    pub fn auth_enabled(&self) -> bool {
        self.firebase_api_key.is_some()
    }
}
