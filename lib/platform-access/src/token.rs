//! Signing and verification of identity tokens.
//!
//! A [`TokenAuthority`] owns the key material for exactly one regime,
//! either a shared HS256 secret or an Ed25519 key pair. Tokens are compact
//! JWS strings carrying [`Claims`]; expiry is mandatory. Other services
//! check them with a [`TokenVerifier`] built from the published key.

use crate::error::TokenError;
use crate::role::PermissionSet;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thor_core::UserId;
use tracing::debug;

/// Shortest accepted HS256 secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Key material for one signing regime.
#[derive(Clone)]
pub enum SigningKeys {
    /// HS256 with a shared secret.
    Symmetric { secret: Vec<u8> },
    /// EdDSA with PEM encoded Ed25519 keys.
    Asymmetric {
        private_pem: Vec<u8>,
        public_pem: Vec<u8>,
    },
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric { .. } => f.write_str("SigningKeys::Symmetric(..)"),
            Self::Asymmetric { .. } => f.write_str("SigningKeys::Asymmetric(..)"),
        }
    }
}

/// The signed payload of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: UserId,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Issue time, seconds since the epoch.
    pub iat: i64,
    pub permissions: PermissionSet,
}

/// Verifies tokens without being able to sign them.
///
/// Services that consume tokens build one from the published PEM; the
/// [`TokenAuthority`] verifies through one as well.
#[derive(Clone)]
pub struct TokenVerifier {
    issuer: String,
    algorithm: Algorithm,
    decoding: DecodingKey,
}

impl TokenVerifier {
    /// A verifier for EdDSA tokens from the PEM served at `/public-key`.
    pub fn from_public_pem(
        issuer: impl Into<String>,
        public_pem: &[u8],
    ) -> Result<Self, Report<TokenError>> {
        let decoding = DecodingKey::from_ed_pem(public_pem).map_err(|e| TokenError::Key {
            reason: format!("public key: {e}"),
        })?;
        Ok(Self {
            issuer: issuer.into(),
            algorithm: Algorithm::EdDSA,
            decoding,
        })
    }

    /// A verifier for HS256 tokens signed with `secret`.
    pub fn from_secret(issuer: impl Into<String>, secret: &[u8]) -> Result<Self, Report<TokenError>> {
        check_secret(secret)?;
        Ok(Self {
            issuer: issuer.into(),
            algorithm: Algorithm::HS256,
            decoding: DecodingKey::from_secret(secret),
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Verifies a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Claims, Report<TokenError>> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verifies a token as if the current time were `now`.
    ///
    /// A token is expired from its `exp` second onwards.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, Report<TokenError>> {
        let algorithm = header_algorithm(token)?;
        if algorithm != algorithm_name(self.algorithm) {
            return Err(TokenError::UnsupportedAlgorithm { algorithm }.into());
        }

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.set_issuer(&[&self.issuer]);

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| classify_decode_error(&e))?;

        if now >= data.claims.exp {
            return Err(TokenError::Expired.into());
        }
        Ok(data.claims)
    }
}

fn check_secret(secret: &[u8]) -> Result<(), TokenError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(TokenError::Key {
            reason: format!("secret must be at least {MIN_SECRET_LEN} bytes"),
        });
    }
    Ok(())
}

/// Signs and verifies tokens with immutable key material.
pub struct TokenAuthority {
    validity: Duration,
    encoding: EncodingKey,
    verifier: TokenVerifier,
    public_key: Option<Vec<u8>>,
}

impl TokenAuthority {
    /// Builds an authority and checks that its keys sign and verify each
    /// other's output.
    pub fn new(
        issuer: impl Into<String>,
        keys: SigningKeys,
        validity: Duration,
    ) -> Result<Self, Report<TokenError>> {
        let issuer = issuer.into();
        let (encoding, verifier, public_key) = match keys {
            SigningKeys::Symmetric { secret } => (
                EncodingKey::from_secret(&secret),
                TokenVerifier::from_secret(issuer, &secret)?,
                None,
            ),
            SigningKeys::Asymmetric {
                private_pem,
                public_pem,
            } => {
                let encoding =
                    EncodingKey::from_ed_pem(&private_pem).map_err(|e| TokenError::Key {
                        reason: format!("private key: {e}"),
                    })?;
                let verifier = TokenVerifier::from_public_pem(issuer, &public_pem)?;
                (encoding, verifier, Some(public_pem))
            }
        };

        let authority = Self {
            validity,
            encoding,
            verifier,
            public_key,
        };

        let now = Utc::now().timestamp();
        let sample = authority.sign_at(
            UserId::new(),
            &PermissionSet::new(),
            Duration::from_secs(60),
            now,
        )?;
        if let Err(report) = authority.verify_at(&sample, now) {
            return Err(TokenError::Key {
                reason: format!("keys do not form a pair: {}", report.current_context()),
            }
            .into());
        }

        debug!(algorithm = ?authority.algorithm(), issuer = %authority.issuer(), "token authority ready");
        Ok(authority)
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        self.verifier.issuer()
    }

    /// The lifetime given to tokens minted at login.
    #[must_use]
    pub fn validity(&self) -> Duration {
        self.validity
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.verifier.algorithm()
    }

    /// The verification half of this authority.
    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// The PEM encoded verification key, when running asymmetric.
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    /// Signs a token for `subject` that expires `ttl` from now.
    pub fn sign(
        &self,
        subject: UserId,
        permissions: &PermissionSet,
        ttl: Duration,
    ) -> Result<String, Report<TokenError>> {
        self.sign_at(subject, permissions, ttl, Utc::now().timestamp())
    }

    /// Signs a token as if the current time were `now`.
    pub fn sign_at(
        &self,
        subject: UserId,
        permissions: &PermissionSet,
        ttl: Duration,
        now: i64,
    ) -> Result<String, Report<TokenError>> {
        let ttl = i64::try_from(ttl.as_secs()).map_err(|_| TokenError::Signing {
            reason: "ttl out of range".to_string(),
        })?;
        let exp = now.checked_add(ttl).ok_or_else(|| TokenError::Signing {
            reason: "expiry out of range".to_string(),
        })?;

        let claims = Claims {
            iss: self.issuer().to_string(),
            sub: subject,
            exp,
            iat: now,
            permissions: permissions.clone(),
        };

        jsonwebtoken::encode(&Header::new(self.algorithm()), &claims, &self.encoding).map_err(|e| {
            TokenError::Signing {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Verifies a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Claims, Report<TokenError>> {
        self.verifier.verify(token)
    }

    /// Verifies a token as if the current time were `now`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, Report<TokenError>> {
        self.verifier.verify_at(token, now)
    }
}

/// Reads the `alg` field of the token header without trusting anything else.
fn header_algorithm(token: &str) -> Result<String, Report<TokenError>> {
    let malformed = |reason: &str| TokenError::Malformed {
        reason: reason.to_string(),
    };

    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(malformed("expected three segments").into());
    };

    let header = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| malformed("header is not base64url"))?;
    let header: serde_json::Value =
        serde_json::from_slice(&header).map_err(|_| malformed("header is not JSON"))?;

    match header.get("alg").and_then(serde_json::Value::as_str) {
        Some(algorithm) => Ok(algorithm.to_string()),
        None => Err(malformed("header has no algorithm").into()),
    }
}

fn algorithm_name(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::HS256 => "HS256",
        Algorithm::EdDSA => "EdDSA",
        _ => "unsupported",
    }
}

fn classify_decode_error(error: &jsonwebtoken::errors::Error) -> TokenError {
    match error.kind() {
        ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
        ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => {
            TokenError::UnsupportedAlgorithm {
                algorithm: "unknown".to_string(),
            }
        }
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
        _ => TokenError::Malformed {
            reason: error.to_string(),
        },
    }
}
