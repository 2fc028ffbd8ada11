// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets (OAuth client secret, signing keys, token encryption key) are read
//! once at startup. A `.env` file is honored for local development.

use std::env;

/// Default free/busy sync horizon, in weeks from now.
const DEFAULT_SYNC_HORIZON_WEEKS: i64 = 12;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Google OAuth client ID (public)
    pub google_client_id: String,
    /// Public base URL of this API (used for the registered OAuth redirect URI)
    pub api_url: String,
    /// Frontend URL for OAuth redirects and CORS
    pub frontend_url: String,
    /// SQLite database file path
    pub database_path: String,
    /// How far into the future free/busy syncs look
    pub sync_horizon_weeks: i64,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// Google OAuth client secret
    pub google_client_secret: String,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for signing the OAuth state cookie (raw bytes)
    pub oauth_state_key: Vec<u8>,
    /// Master key material for the token cipher (raw bytes)
    pub token_encryption_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            // Non-sensitive config from env
            google_client_id: env::var("GOOGLE_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("GOOGLE_CLIENT_ID"))?,
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/tandem.db".to_string()),
            sync_horizon_weeks: env::var("SYNC_HORIZON_WEEKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SYNC_HORIZON_WEEKS),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),

            // Secrets - from env (injected by the deploy environment)
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("GOOGLE_CLIENT_SECRET"))?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            oauth_state_key: env::var("OAUTH_STATE_KEY")
                .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
                .into_bytes(),
            token_encryption_key: env::var("TOKEN_ENCRYPTION_KEY")
                .map_err(|_| ConfigError::Missing("TOKEN_ENCRYPTION_KEY"))?
                .into_bytes(),
        })
    }

    /// The redirect URI registered with Google for the OAuth callback.
    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/auth/google/callback", self.api_url)
    }

    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            google_client_id: "test_client_id".to_string(),
            api_url: "http://localhost:8080".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            database_path: ":memory:".to_string(),
            sync_horizon_weeks: DEFAULT_SYNC_HORIZON_WEEKS,
            port: 8080,
            google_client_secret: "test_secret".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            oauth_state_key: b"test_state_key_32_bytes_minimum".to_vec(),
            token_encryption_key: b"test_token_master_key_32_bytes!".to_vec(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("GOOGLE_CLIENT_ID", "test_id");
        env::set_var("GOOGLE_CLIENT_SECRET", "test_secret");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("OAUTH_STATE_KEY", "test_state_key_32_bytes_minimum");
        env::set_var("TOKEN_ENCRYPTION_KEY", "test_token_master_key_32_bytes!");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.google_client_id, "test_id");
        assert_eq!(config.google_client_secret, "test_secret");
        assert_eq!(config.sync_horizon_weeks, 12);
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.oauth_redirect_uri(),
            "http://localhost:8080/auth/google/callback"
        );
    }
}
