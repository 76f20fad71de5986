//! State carried between the login and callback legs.
//!
//! A `PendingLogin` is created when the browser is sent to a provider and
//! consumed by the callback. It lives in an encrypted cookie, never in
//! storage.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKey;

/// Number of random bytes behind each state value.
pub const STATE_BYTES: usize = 32;

/// How long the browser has to come back from the provider, in seconds.
pub const PENDING_LOGIN_TTL_SECS: i64 = 600;

/// Generates a fresh anti-CSRF state value.
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// One login attempt awaiting its callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    state: String,
    /// The `type/name` key of the provider the browser was sent to.
    provider: String,
    return_to: Option<String>,
    created_at: DateTime<Utc>,
}

impl PendingLogin {
    /// Starts a login attempt against `provider` with a fresh state value.
    #[must_use]
    pub fn new(provider: &ProviderKey, return_to: Option<String>) -> Self {
        Self {
            state: generate_state(),
            provider: provider.to_string(),
            return_to,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Where to send the browser once the login completes.
    #[must_use]
    pub fn return_to(&self) -> Option<&str> {
        self.return_to.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true once the attempt is older than [`PENDING_LOGIN_TTL_SECS`].
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.created_at + Duration::seconds(PENDING_LOGIN_TTL_SECS)
    }

    /// Returns true if the callback parameters belong to this attempt.
    ///
    /// Comparison time does not depend on where the values differ.
    #[must_use]
    pub fn matches(&self, provider: &ProviderKey, state: &str) -> bool {
        let provider = provider.to_string();
        constant_time_eq(self.state.as_bytes(), state.as_bytes())
            & constant_time_eq(self.provider.as_bytes(), provider.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
