//! Centralized server configuration.
//!
//! Configuration is loaded via the `config` crate from an optional `thor`
//! file (`thor.yml`, `thor.toml`, `thor.json`, ...) in the working
//! directory, then from environment variables using `__` as the nesting
//! separator, e.g. `TOKEN__KEY__REGIME=symmetric`.
//!
//! See [`ProviderConfig`] for the shape of one provider entry.

use crate::error::StartupError;
use axum_extra::extract::cookie::Key;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use rootcause::Report;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thor_platform_access::{ProviderConfig, SigningKeys};
use url::Url;

/// Shortest accepted session cookie secret, in bytes.
pub const MIN_COOKIE_SECRET_LEN: usize = 64;

/// Server configuration.
#[derive(Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Public base URL of this service, e.g. `https://auth.example.com`.
    /// Callback URLs are derived from it, and an `http` scheme turns off
    /// the `Secure` cookie flag.
    pub app_url: String,

    /// Upper bound on the duration of one request, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    pub token: TokenConfig,

    pub oauth: OAuthConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    10
}

impl ServerConfig {
    /// Loads configuration from the optional `thor` file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name("thor").required(false))
                .add_source(
                    config::Environment::default()
                        .separator("__")
                        .list_separator(",")
                        .with_list_parse_key("oauth.allowed_returns")
                        .try_parsing(true),
                ),
        )
    }

    /// Deserializes configuration from an already assembled builder.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// The issuer stamped into tokens: the configured one, or the app URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.token.issuer.as_deref().unwrap_or(&self.app_url)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("database_url", &redact_url(&self.database_url))
            .field("app_url", &self.app_url)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("token", &self.token)
            .field("oauth", &self.oauth)
            .finish()
    }
}

/// `raw` with its password masked. Unparseable URLs are masked whole.
fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("***")).is_err() {
                return "***".to_string();
            }
            url.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Value of the `iss` claim. Defaults to the app URL.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Lifetime of issued tokens, in seconds.
    #[serde(default = "default_valid_duration_seconds")]
    pub valid_duration_seconds: u64,

    pub key: SigningKeyConfig,
}

fn default_valid_duration_seconds() -> u64 {
    3600
}

impl TokenConfig {
    #[must_use]
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.valid_duration_seconds)
    }

    /// Reads the configured key material.
    ///
    /// # Errors
    ///
    /// Returns an error if a key file cannot be read.
    pub fn signing_keys(&self) -> Result<SigningKeys, Report<StartupError>> {
        match &self.key {
            SigningKeyConfig::Symmetric { secret } => Ok(SigningKeys::Symmetric {
                secret: secret.as_bytes().to_vec(),
            }),
            SigningKeyConfig::Asymmetric {
                private_key_path,
                public_key_path,
            } => Ok(SigningKeys::Asymmetric {
                private_pem: read_key(private_key_path)?,
                public_pem: read_key(public_key_path)?,
            }),
        }
    }
}

fn read_key(path: &Path) -> Result<Vec<u8>, StartupError> {
    std::fs::read(path).map_err(|e| StartupError::Keys {
        reason: format!("{}: {e}", path.display()),
    })
}

/// Signing regime, tagged by `regime`.
#[derive(Clone, Deserialize)]
#[serde(tag = "regime", rename_all = "lowercase")]
pub enum SigningKeyConfig {
    /// HS256 with a shared secret of at least 32 bytes.
    Symmetric { secret: String },
    /// EdDSA with Ed25519 PEM key files.
    Asymmetric {
        private_key_path: PathBuf,
        public_key_path: PathBuf,
    },
}

impl fmt::Debug for SigningKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric { .. } => f.debug_struct("Symmetric").finish_non_exhaustive(),
            Self::Asymmetric {
                private_key_path,
                public_key_path,
            } => f
                .debug_struct("Asymmetric")
                .field("private_key_path", private_key_path)
                .field("public_key_path", public_key_path)
                .finish(),
        }
    }
}

/// Login flow configuration.
#[derive(Clone, Deserialize)]
pub struct OAuthConfig {
    /// Name of the cookie carrying the signed token.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Name of the encrypted cookie carrying the pending login.
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,

    /// Secret the pending-login cookie is encrypted with.
    pub cookie_secret: String,

    /// Hosts or origins a login may return to.
    #[serde(default)]
    pub allowed_returns: Vec<String>,

    /// Landing page when a login did not ask for a return URL.
    #[serde(default = "default_return")]
    pub default_return: String,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_cookie_name() -> String {
    "thor_token".to_string()
}

fn default_session_cookie_name() -> String {
    "thor_session".to_string()
}

fn default_return() -> String {
    "/welcome.html".to_string()
}

impl OAuthConfig {
    /// Derives the key that encrypts the pending-login cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than
    /// [`MIN_COOKIE_SECRET_LEN`] bytes.
    pub fn cookie_key(&self) -> Result<Key, StartupError> {
        Key::try_from(self.cookie_secret.as_bytes()).map_err(|_| StartupError::Config {
            reason: format!("oauth.cookie_secret must be at least {MIN_COOKIE_SECRET_LEN} bytes"),
        })
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("cookie_name", &self.cookie_name)
            .field("session_cookie_name", &self.session_cookie_name)
            .field("allowed_returns", &self.allowed_returns)
            .field("default_return", &self.default_return)
            .field(
                "providers",
                &self
                    .providers
                    .iter()
                    .map(ProviderConfig::key)
                    .map(|key| key.to_string())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
