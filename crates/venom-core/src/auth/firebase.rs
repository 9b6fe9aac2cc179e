//! Firebase Identity Toolkit REST backend (email/password accounts).

use super::AuthBackend;
use crate::config::CoreConfig;
use crate::error::AuthError;
use crate::types::AuthUser;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct FirebaseAuth {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl FirebaseAuth {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Returns `None` when no Firebase API key is configured.
    pub fn from_config(config: &CoreConfig) -> Option<Self> {
        let key = config.firebase_api_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(config.auth_endpoint.clone(), key))
    }

    async fn password_call(
        &self,
        action: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, AuthError> {
        let url = format!("{}/accounts:{}?key={}", self.endpoint, action, self.api_key);
        let res = self
            .client
            .post(&url)
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let code = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|env| env.error.message)
                .unwrap_or_else(|_| format!("{}: {}", status, body));
            return Err(classify(code));
        }

        let account: AccountResponse = res
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("malformed auth response: {}", e)))?;
        debug!(uid = %account.local_id, action, "firebase auth ok");
        Ok(AuthUser {
            uid: account.local_id,
            email: account.email.unwrap_or_else(|| email.to_string()),
            id_token: account.id_token,
            refresh_token: account.refresh_token,
        })
    }
}

fn classify(code: String) -> AuthError {
    let head = code.split([' ', ':']).next().unwrap_or_default();
    match head {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL" => {
            AuthError::InvalidCredentials(code)
        }
        "API_KEY_INVALID" | "CONFIGURATION_NOT_FOUND" => AuthError::Configuration(code),
        _ => AuthError::Rejected(code),
    }
}

#[async_trait]
impl AuthBackend for FirebaseAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        self.password_call("signUp", email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        self.password_call("signInWithPassword", email, password).await
    }

    /// Tokens are only held client-side; dropping them is the whole sign-out.
    async fn sign_out(&self, _user: &AuthUser) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firebase_codes_map_to_error_kinds() {
        assert!(matches!(
            classify("INVALID_PASSWORD".into()),
            AuthError::InvalidCredentials(_)
        ));
        assert!(matches!(
            classify("WEAK_PASSWORD : Password should be at least 6 characters".into()),
            AuthError::Rejected(_)
        ));
        assert!(matches!(
            classify("API_KEY_INVALID".into()),
            AuthError::Configuration(_)
        ));
    }

    #[test]
    fn from_config_requires_a_key() {
        let mut config = CoreConfig::default();
        assert!(FirebaseAuth::from_config(&config).is_none());
        config.firebase_api_key = Some("  ".into());
        assert!(FirebaseAuth::from_config(&config).is_none());
        config.firebase_api_key = Some("abc".into());
        assert!(FirebaseAuth::from_config(&config).is_some());
    }
}
