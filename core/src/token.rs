//! Signed, time-bound agent credentials.
//!
//! Tokens are JWTs (HS256) carrying the agent's identity, provider,
//! permission set, and scopes. The service verifies structure before
//! cryptography so malformed input never reaches the MAC check, and it
//! never mutates a token after issuance: a token is `valid` until its
//! `exp` passes, then `expired`. There is no revoked state.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::Permission;
use crate::registry::AgentIdentity;

/// Fixed credential lifetime.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Tokens shorter than this cannot be a signed JWT; reject before verifying.
const MIN_TOKEN_LEN: usize = 32;

/// Claims embedded in every agent token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Agent id.
    pub sub: Uuid,
    pub provider: String,
    pub permissions: Vec<Permission>,
    pub scopes: Vec<String>,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch. Always greater than `iat`.
    pub exp: i64,
    /// Unique token identifier, reserved for a future revocation list.
    pub jti: Uuid,
}

impl TokenClaims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.exp - now.timestamp()).max(0)
    }
}

/// A freshly issued credential plus the metadata callers echo back.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct IssuedToken {
    pub token: String,
    pub agent_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub permissions: Vec<Permission>,
    pub scopes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Empty, too short, or not three dot-separated segments.
    #[error("token is structurally malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token verification failed")]
    Verification,
    #[error("token could not be signed")]
    Signing,
}

impl TokenError {
    /// Machine code surfaced to callers, per the error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed => crate::error::codes::MALFORMED_TOKEN,
            TokenError::Expired => crate::error::codes::TOKEN_EXPIRED,
            TokenError::InvalidSignature | TokenError::Verification | TokenError::Signing => {
                crate::error::codes::INVALID_TOKEN
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SigningKeyError {
    #[error("GATEHOUSE_SIGNING_KEY must be set when GATEHOUSE_ENV=production")]
    MissingInProduction,
    #[error("GATEHOUSE_SIGNING_KEY must be at least 32 bytes")]
    TooShort,
}

/// Symmetric key material for token signing.
pub struct SigningKey {
    secret: Vec<u8>,
    ephemeral: bool,
}

impl SigningKey {
    pub fn from_secret(secret: &[u8]) -> Result<Self, SigningKeyError> {
        if secret.len() < 32 {
            return Err(SigningKeyError::TooShort);
        }
        Ok(Self {
            secret: secret.to_vec(),
            ephemeral: false,
        })
    }

    /// Load from `GATEHOUSE_SIGNING_KEY`.
    ///
    /// Absent key material is fatal in a production posture. Outside
    /// production a random ephemeral key is generated so development
    /// setups work out of the box; tokens then die with the process.
    pub fn from_env() -> Result<Self, SigningKeyError> {
        match std::env::var("GATEHOUSE_SIGNING_KEY") {
            Ok(value) if !value.trim().is_empty() => Self::from_secret(value.trim().as_bytes()),
            _ => {
                let production = std::env::var("GATEHOUSE_ENV")
                    .map(|v| v.eq_ignore_ascii_case("production"))
                    .unwrap_or(false);
                if production {
                    return Err(SigningKeyError::MissingInProduction);
                }
                tracing::warn!(
                    "GATEHOUSE_SIGNING_KEY not set; using an ephemeral development key. \
                     Tokens will not survive a restart."
                );
                Ok(Self {
                    secret: random_secret(),
                    ephemeral: true,
                })
            }
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

fn random_secret() -> Vec<u8> {
    (0..48).map(|_| rand::thread_rng().r#gen::<u8>()).collect()
}

/// Issues and verifies agent tokens. Pure computation once constructed.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(key: &SigningKey) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(&key.secret),
            decoding: DecodingKey::from_secret(&key.secret),
            validation,
            ttl: Duration::hours(TOKEN_TTL_HOURS),
        }
    }

    /// Sign a credential for `identity` with the given permission set.
    ///
    /// Permission resolution (registry lookup, `{read}` fallback) is the
    /// caller's job; this service only stamps and signs.
    pub fn issue(
        &self,
        identity: &AgentIdentity,
        permissions: Vec<Permission>,
        scopes: Vec<String>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(identity, permissions, scopes, Utc::now())
    }

    fn issue_at(
        &self,
        identity: &AgentIdentity,
        permissions: Vec<Permission>,
        scopes: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        debug_assert!(!permissions.is_empty(), "token permissions must be non-empty");
        let issued_at = now;
        let expires_at = now + self.ttl;
        let scopes = if scopes.is_empty() {
            vec!["*".to_string()]
        } else {
            scopes
        };
        let claims = TokenClaims {
            sub: identity.id,
            provider: identity.provider.clone(),
            permissions: permissions.clone(),
            scopes: scopes.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::now_v7(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Signing)?;
        Ok(IssuedToken {
            token,
            agent_id: identity.id,
            issued_at,
            expires_at,
            permissions,
            scopes,
        })
    }

    /// Verify a token string and return its claims.
    ///
    /// Structural rejects (`Malformed`) happen before any cryptographic
    /// work; expiry and signature failures map to their own variants so
    /// callers can surface a specific code.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let token = token.trim();
        if token.is_empty() || token.len() < MIN_TOKEN_LEN {
            return Err(TokenError::Malformed);
        }
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed);
        }
        match decode::<TokenClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    Err(TokenError::InvalidSignature)
                }
                _ => Err(TokenError::Verification),
            },
        }
    }
}

/// Provider keyword lists for best-effort user-agent classification.
const PROVIDER_KEYWORDS: &[(&str, &[&str])] = &[
    ("openai", &["openai", "chatgpt", "gpt-"]),
    ("anthropic", &["anthropic", "claude"]),
    ("google", &["google", "gemini", "bard"]),
    ("meta", &["meta-", "llama"]),
    ("mistral", &["mistral"]),
];

/// Best-effort provider detection from a free-text client identifier.
///
/// Advisory metadata only. Never an input to authorization.
pub fn detect_provider(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();
    for (provider, keywords) in PROVIDER_KEYWORDS {
        if keywords.iter().any(|kw| ua.contains(kw)) {
            return provider;
        }
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentIdentity;

    fn identity() -> AgentIdentity {
        AgentIdentity {
            id: Uuid::now_v7(),
            name: "shopper".to_string(),
            provider: "anthropic".to_string(),
            version: Some("1.2".to_string()),
            capabilities: vec!["checkout".to_string()],
        }
    }

    fn service() -> TokenService {
        let key = SigningKey::from_secret(b"0123456789abcdef0123456789abcdef").unwrap();
        TokenService::new(&key)
    }

    #[test]
    fn issue_then_verify_roundtrips_identity_and_scopes() {
        let svc = service();
        let identity = identity();
        let scopes = vec!["tools:*".to_string(), "resources:catalog".to_string()];
        let issued = svc
            .issue(&identity, vec![Permission::Read, Permission::Write], scopes.clone())
            .unwrap();

        assert!(issued.expires_at > issued.issued_at);

        let claims = svc.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, identity.id);
        assert_eq!(claims.provider, "anthropic");
        assert_eq!(claims.scopes, scopes);
        assert_eq!(claims.permissions, vec![Permission::Read, Permission::Write]);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn empty_scope_list_defaults_to_global_wildcard() {
        let svc = service();
        let issued = svc
            .issue(&identity(), vec![Permission::Read], Vec::new())
            .unwrap();
        assert_eq!(issued.scopes, vec!["*".to_string()]);
    }

    #[test]
    fn expired_token_fails_with_expiry_error() {
        let svc = service();
        let issued = svc
            .issue_at(
                &identity(),
                vec![Permission::Read],
                Vec::new(),
                Utc::now() - Duration::hours(TOKEN_TTL_HOURS + 1),
            )
            .unwrap();
        assert!(matches!(svc.verify(&issued.token), Err(TokenError::Expired)));
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let svc = service();
        let other = TokenService::new(
            &SigningKey::from_secret(b"ffffffffffffffffffffffffffffffff").unwrap(),
        );
        let issued = other
            .issue(&identity(), vec![Permission::Read], Vec::new())
            .unwrap();
        assert!(matches!(
            svc.verify(&issued.token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn structural_rejects_happen_before_verification() {
        let svc = service();
        assert!(matches!(svc.verify(""), Err(TokenError::Malformed)));
        assert!(matches!(svc.verify("abc"), Err(TokenError::Malformed)));
        // Long enough, but not three dot-separated segments.
        let two_segments = format!("{}.{}", "a".repeat(32), "b".repeat(32));
        assert!(matches!(svc.verify(&two_segments), Err(TokenError::Malformed)));
        let four_segments = format!("{0}.{0}.{0}.{0}", "a".repeat(16));
        assert!(matches!(svc.verify(&four_segments), Err(TokenError::Malformed)));
    }

    #[test]
    fn garbage_with_three_segments_is_a_verification_failure() {
        let svc = service();
        let garbage = format!("{0}.{0}.{0}", "a".repeat(24));
        assert!(matches!(svc.verify(&garbage), Err(TokenError::Verification)));
    }

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(TokenError::Expired.code(), "TOKEN_EXPIRED");
        assert_eq!(TokenError::Malformed.code(), "MALFORMED_TOKEN");
        assert_eq!(TokenError::InvalidSignature.code(), "INVALID_TOKEN");
    }

    #[test]
    fn provider_detection_matches_known_keywords() {
        assert_eq!(detect_provider("ChatGPT-User/1.0 (+openai.com)"), "openai");
        assert_eq!(detect_provider("Claude-Web/1.0 anthropic-ai"), "anthropic");
        assert_eq!(detect_provider("Gemini-Agent/2.0"), "google");
        assert_eq!(detect_provider("Mozilla/5.0 curl/8.0"), "unknown");
    }
}
