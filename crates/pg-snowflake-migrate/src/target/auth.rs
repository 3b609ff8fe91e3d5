//! Key-pair JWT authentication for the warehouse SQL API.
//!
//! Each token is an RS256 JWT:
//!
//! | claim | value |
//! |---|---|
//! | `iss` | `<ACCOUNT>.<USER>.SHA256:<public key fingerprint>` |
//! | `sub` | `<ACCOUNT>.<USER>` |
//! | `iat` | issue time (seconds) |
//! | `exp` | `iat` + 59 minutes |
//!
//! Tokens are cached and re-signed once they are within five minutes of expiry.

use std::sync::Mutex;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{KeyMaterial, TargetConfig};
use crate::error::{MigrateError, Result};

/// Token lifetime; the API rejects tokens valid for more than an hour.
const TOKEN_LIFETIME_SECS: i64 = 59 * 60;

/// Re-sign when fewer than this many seconds remain.
const RENEW_MARGIN_SECS: i64 = 5 * 60;

/// JWT claims sent to the SQL API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Signs and caches login tokens.
pub struct JwtAuthenticator {
    qualified_user: String,
    fingerprint: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("qualified_user", &self.qualified_user)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl JwtAuthenticator {
    /// Build an authenticator from loaded key material.
    pub fn new(config: &TargetConfig, material: &KeyMaterial) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(&material.private_key_pem).map_err(|e| {
            MigrateError::Credentials(format!("private key is not a valid RSA PEM key: {}", e))
        })?;

        Ok(Self {
            qualified_user: format!(
                "{}.{}",
                config.account_identifier(),
                config.user.to_uppercase()
            ),
            fingerprint: material.fingerprint.clone(),
            key,
            cached: Mutex::new(None),
        })
    }

    /// Current token, re-signed if it is missing or about to expire.
    pub fn token(&self) -> Result<String> {
        self.token_at(Utc::now().timestamp())
    }

    fn token_at(&self, now: i64) -> Result<String> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| MigrateError::Credentials("token cache lock poisoned".into()))?;

        if let Some(entry) = cached.as_ref() {
            if entry.expires_at - now > RENEW_MARGIN_SECS {
                return Ok(entry.token.clone());
            }
        }

        let claims = self.claims(now);
        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| MigrateError::Credentials(format!("failed to sign login token: {}", e)))?;
        debug!("Signed login token for {} (expires {})", claims.sub, claims.exp);

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: claims.exp,
        });
        Ok(token)
    }

    /// Claims for a token issued at `now`.
    pub fn claims(&self, now: i64) -> Claims {
        Claims {
            iss: format!("{}.{}", self.qualified_user, self.fingerprint),
            sub: self.qualified_user.clone(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    pub(crate) const PRIVATE_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/rsa_key.p8"
    ));
    pub(crate) const PUBLIC_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/rsa_key.pub"
    ));
    pub(crate) const FINGERPRINT: &str = "SHA256:2xADWF7tm8ismsqjvHiAh5ox8txuAXxDzXkOQc8iQxA=";

    pub(crate) fn target_config() -> TargetConfig {
        serde_yaml::from_str(
            "account: xy12345.us-east-1\nuser: migrator\nrole: SYSADMIN\nwarehouse: COMPUTE_WH\ndatabase_suffix: test\n",
        )
        .unwrap()
    }

    pub(crate) fn authenticator() -> JwtAuthenticator {
        let material = KeyMaterial {
            private_key_pem: PRIVATE_KEY.as_bytes().to_vec(),
            fingerprint: FINGERPRINT.to_string(),
        };
        JwtAuthenticator::new(&target_config(), &material).unwrap()
    }

    #[test]
    fn test_fixture_fingerprint_matches_public_key() {
        assert_eq!(
            crate::config::public_key_fingerprint(PUBLIC_KEY).unwrap(),
            FINGERPRINT
        );
    }

    #[test]
    fn test_claims_layout() {
        let claims = authenticator().claims(1_700_000_000);
        assert_eq!(claims.sub, "XY12345.MIGRATOR");
        assert_eq!(claims.iss, format!("XY12345.MIGRATOR.{}", FINGERPRINT));
        assert_eq!(claims.exp - claims.iat, 59 * 60);
    }

    #[test]
    fn test_token_verifies_with_public_key() {
        let token = authenticator().token().unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        let decoded = decode::<Claims>(&token, &key, &validation).unwrap();

        assert_eq!(decoded.claims.sub, "XY12345.MIGRATOR");
        assert!(decoded.claims.iss.ends_with(FINGERPRINT));
    }

    #[test]
    fn test_token_cached_until_renewal_window() {
        let auth = authenticator();
        let first = auth.token_at(1_700_000_000).unwrap();
        let again = auth.token_at(1_700_000_000 + 60).unwrap();
        assert_eq!(first, again);

        let renewed = auth
            .token_at(1_700_000_000 + TOKEN_LIFETIME_SECS - RENEW_MARGIN_SECS)
            .unwrap();
        assert_ne!(first, renewed);
    }

    #[test]
    fn test_invalid_key_is_credentials_error() {
        let material = KeyMaterial {
            private_key_pem: b"not a key".to_vec(),
            fingerprint: FINGERPRINT.to_string(),
        };
        let err = JwtAuthenticator::new(&target_config(), &material).unwrap_err();
        assert!(matches!(err, MigrateError::Credentials(_)));
    }
}
