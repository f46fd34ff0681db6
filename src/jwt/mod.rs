//! Bearer credential issuance and verification

use crate::clock::Clock;
use crate::config::JwtConfig;
use crate::domain::{Actor, Role, StringUuid};
use crate::error::{AppError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// None for platform-level principals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub role: Role,
    /// Per-credential session ID
    pub sid: String,
    pub iss: String,
    pub aud: String,
    /// Token type discriminator (prevents token confusion attacks)
    #[serde(default)]
    pub token_type: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Subject token version at issuance
    #[serde(default)]
    pub ver: i64,
}

/// Identity established by a verified credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub user_id: StringUuid,
    pub tenant_id: Option<StringUuid>,
    pub role: Role,
    pub session_id: StringUuid,
    pub issued_at: i64,
    pub expires_at: i64,
    pub token_version: i64,
}

impl VerifiedClaims {
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expires_at, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            role: self.role,
        }
    }
}

/// A freshly issued credential
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub session_id: StringUuid,
    pub expires_at: DateTime<Utc>,
}

struct VerificationKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

/// Signs and verifies access tokens.
///
/// The active key version is written to the `kid` header; verification
/// selects the key by `kid`, so tokens signed with a previous secret stay
/// valid until they expire.
#[derive(Clone)]
pub struct TokenService {
    config: JwtConfig,
    clock: Arc<dyn Clock>,
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    keys: Arc<HashMap<String, VerificationKey>>,
}

impl TokenService {
    pub fn new(config: JwtConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let (algorithm, encoding_key, active_key) = match config.private_key_pem.as_ref() {
            Some(private_key) => {
                let encoding_key = EncodingKey::from_rsa_pem(private_key.as_bytes())?;
                let public_key = config.public_key_pem.as_ref().ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!(
                        "JWT_PUBLIC_KEY is required when JWT_PRIVATE_KEY is set"
                    ))
                })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key.as_bytes())?;
                (Algorithm::RS256, encoding_key, decoding_key)
            }
            None => {
                if config.secret.is_empty() {
                    return Err(AppError::Internal(anyhow::anyhow!("JWT secret is empty")));
                }
                (
                    Algorithm::HS256,
                    EncodingKey::from_secret(config.secret.as_bytes()),
                    DecodingKey::from_secret(config.secret.as_bytes()),
                )
            }
        };

        let mut keys = HashMap::new();
        for (version, secret) in &config.previous_secrets {
            keys.insert(
                version.clone(),
                VerificationKey {
                    key: DecodingKey::from_secret(secret.as_bytes()),
                    algorithm: Algorithm::HS256,
                },
            );
        }
        keys.insert(
            config.key_version.clone(),
            VerificationKey {
                key: active_key,
                algorithm,
            },
        );

        Ok(Self {
            config,
            clock,
            encoding_key,
            algorithm,
            keys: Arc::new(keys),
        })
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.config.token_ttl_secs)
    }

    /// Skew tolerated past `exp`
    pub fn leeway(&self) -> Duration {
        Duration::seconds(self.config.leeway_secs)
    }

    /// Issue an access token for `(user_id, tenant_id, role)` stamped with the
    /// subject's current `token_version`
    pub fn issue(
        &self,
        user_id: StringUuid,
        tenant_id: Option<StringUuid>,
        role: Role,
        token_version: i64,
    ) -> Result<IssuedToken> {
        let now = self.clock.now();
        let expires_at = now + self.ttl();
        let session_id = StringUuid::new_v4();

        let claims = AccessClaims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.map(|t| t.to_string()),
            role,
            sid: session_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            ver: token_version,
        };
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.config.key_version.clone());
        let token = encode(&header, &claims, &self.encoding_key)?;

        metrics::counter!("rollcall_tokens_issued_total").increment(1);
        Ok(IssuedToken {
            token,
            session_id,
            expires_at,
        })
    }

    /// Verify signature, issuer, audience and expiry. Every failure maps to
    /// `InvalidCredential`.
    pub fn verify(&self, token: &str) -> Result<VerifiedClaims> {
        let header = decode_header(token).map_err(|_| AppError::InvalidCredential)?;
        let kid = header
            .kid
            .as_deref()
            .unwrap_or(self.config.key_version.as_str());
        let key = self.keys.get(kid).ok_or_else(|| {
            tracing::debug!(kid, "Token signed with unknown key version");
            AppError::InvalidCredential
        })?;

        let mut validation = Validation::new(key.algorithm);
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);
        // Expiry is checked against the injected clock below
        validation.validate_exp = false;

        let claims = decode::<AccessClaims>(token, &key.key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token verification failed");
                AppError::InvalidCredential
            })?
            .claims;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AppError::InvalidCredential);
        }
        if self.clock.now().timestamp() > claims.exp + self.config.leeway_secs {
            return Err(AppError::InvalidCredential);
        }

        let user_id = claims
            .sub
            .parse::<StringUuid>()
            .map_err(|_| AppError::InvalidCredential)?;
        let tenant_id = claims
            .tenant_id
            .as_deref()
            .map(str::parse::<StringUuid>)
            .transpose()
            .map_err(|_| AppError::InvalidCredential)?;
        let session_id = claims
            .sid
            .parse::<StringUuid>()
            .map_err(|_| AppError::InvalidCredential)?;

        Ok(VerifiedClaims {
            user_id,
            tenant_id,
            role: claims.role,
            session_id,
            issued_at: claims.iat,
            expires_at: claims.exp,
            token_version: claims.ver,
        })
    }

    /// Read the payload without verifying anything. For diagnostics only;
    /// never base an authorization decision on the result.
    pub fn decode(token: &str) -> Option<AccessClaims> {
        let mut parts = token.split('.');
        let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing-purposes".to_string(),
            ..Default::default()
        }
    }

    fn service(config: JwtConfig) -> (TokenService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let service = TokenService::new(config, clock.clone()).unwrap();
        (service, clock)
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let (service, _) = service(test_config());
        let user_id = StringUuid::new_v4();
        let tenant_id = StringUuid::new_v4();

        let issued = service
            .issue(user_id, Some(tenant_id), Role::CompanyAdmin, 7)
            .unwrap();
        let claims = service.verify(&issued.token).unwrap();

        assert_eq!(claims.token_version, 7);
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.tenant_id, Some(tenant_id));
        assert_eq!(claims.role, Role::CompanyAdmin);
        assert_eq!(claims.session_id, issued.session_id);
        assert_eq!(claims.expires_at, issued.expires_at.timestamp());
    }

    #[test]
    fn test_platform_token_has_no_tenant() {
        let (service, _) = service(test_config());
        let issued = service
            .issue(StringUuid::new_v4(), None, Role::PlatformAdmin, 0)
            .unwrap();
        assert_eq!(service.verify(&issued.token).unwrap().tenant_id, None);
    }

    #[test]
    fn test_each_token_gets_its_own_session() {
        let (service, _) = service(test_config());
        let user_id = StringUuid::new_v4();
        let a = service.issue(user_id, None, Role::PlatformAdmin, 0).unwrap();
        let b = service.issue(user_id, None, Role::PlatformAdmin, 0).unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_expired_by_clock() {
        let (service, clock) = service(test_config());
        let issued = service
            .issue(StringUuid::new_v4(), None, Role::PlatformAdmin, 0)
            .unwrap();

        clock.advance(Duration::hours(24));
        assert!(service.verify(&issued.token).is_ok());
        clock.advance(Duration::seconds(1));
        assert!(matches!(
            service.verify(&issued.token),
            Err(AppError::InvalidCredential)
        ));
    }

    #[test]
    fn test_leeway_extends_expiry() {
        let config = JwtConfig {
            leeway_secs: 30,
            ..test_config()
        };
        let (service, clock) = service(config);
        let issued = service
            .issue(StringUuid::new_v4(), None, Role::PlatformAdmin, 0)
            .unwrap();
        clock.advance(Duration::hours(24) + Duration::seconds(30));
        assert!(service.verify(&issued.token).is_ok());
        clock.advance(Duration::seconds(1));
        assert!(service.verify(&issued.token).is_err());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (service, _) = service(test_config());
        let issued = service
            .issue(StringUuid::new_v4(), None, Role::PlatformAdmin, 0)
            .unwrap();

        let signature_start = issued.token.rfind('.').unwrap() + 1;
        let mut bytes = issued.token.into_bytes();
        let target = signature_start + 5;
        bytes[target] = if bytes[target] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert!(matches!(
            service.verify(&tampered),
            Err(AppError::InvalidCredential)
        ));
    }

    #[test]
    fn test_wrong_audience_and_issuer_rejected() {
        let (service, _) = service(test_config());
        let issued = service
            .issue(StringUuid::new_v4(), None, Role::PlatformAdmin, 0)
            .unwrap();

        let (other_aud, _) = self::service(JwtConfig {
            audience: "someone-else".to_string(),
            ..test_config()
        });
        assert!(other_aud.verify(&issued.token).is_err());

        let (other_iss, _) = self::service(JwtConfig {
            issuer: "someone-else".to_string(),
            ..test_config()
        });
        assert!(other_iss.verify(&issued.token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let (service, _) = service(test_config());
        assert!(matches!(
            service.verify("not.a.token"),
            Err(AppError::InvalidCredential)
        ));
        assert!(service.verify("").is_err());
    }

    #[test]
    fn test_previous_key_version_still_verifies() {
        let (old, _) = service(JwtConfig {
            secret: "old-secret".to_string(),
            key_version: "v1".to_string(),
            ..Default::default()
        });
        let issued = old
            .issue(StringUuid::new_v4(), None, Role::PlatformAdmin, 0)
            .unwrap();

        let rotated = JwtConfig {
            secret: "new-secret".to_string(),
            key_version: "v2".to_string(),
            previous_secrets: HashMap::from([("v1".to_string(), "old-secret".to_string())]),
            ..Default::default()
        };
        let (new, _) = service(rotated.clone());
        assert!(new.verify(&issued.token).is_ok());

        let dropped = JwtConfig {
            previous_secrets: HashMap::new(),
            ..rotated
        };
        let (strict, _) = service(dropped);
        assert!(matches!(
            strict.verify(&issued.token),
            Err(AppError::InvalidCredential)
        ));
    }

    #[test]
    fn test_decode_without_verification() {
        let (service, clock) = service(test_config());
        let user_id = StringUuid::new_v4();
        let issued = service.issue(user_id, None, Role::PlatformAdmin, 0).unwrap();

        clock.advance(Duration::days(30));
        let claims = TokenService::decode(&issued.token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.token_type, "access");
        assert_eq!(claims.iss, "rollcall");

        assert!(TokenService::decode("garbage").is_none());
        assert!(TokenService::decode("a.b.c.d").is_none());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        assert!(TokenService::new(JwtConfig::default(), clock).is_err());
    }
}
