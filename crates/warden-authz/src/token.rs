//! Identity token verification and key material.
//!
//! # Purpose
//! Turns a bearer JWT into a [`ClaimSet`], or rejects it. Also holds the
//! rotatable [`KeySet`] and a small [`TokenIssuer`] for local/dev minting.
//!
//! # Key invariants
//! - A [`ClaimSet`] can only be constructed from a token whose signature and
//!   expiry were verified here; there is no public constructor.
//! - Only EdDSA (Ed25519) and RS256 are accepted. HMAC and everything else is
//!   rejected as an unsupported algorithm.
//! - Every failure is reported as [`AuthzError::InvalidToken`]; the inner
//!   [`TokenRejection`] is for logs only.
//!
//! # Concurrency model
//! The active key set lives in an `ArcSwap`. Verification loads a snapshot and
//! never blocks; rotation publishes a new snapshot in one store and then bumps
//! the key epoch. Each [`ClaimSet`] records the epoch read before its snapshot
//! was loaded, so a claim set is current only while that epoch is.
//!
//! # Security model
//! - When the token names a `kid`, only that key is tried. Without a `kid`,
//!   every key of the header algorithm is tried in key-set order.
//! - Raw tokens are never logged or stored by this module.
use crate::errors::{AuthzError, AuthzResult, TokenRejection};
use crate::jwks::{Jwks, KeyUse};
use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Role assumed when a token carries no `role` claim.
pub const DEFAULT_ROLE: &str = "user";

const SUPPORTED_ALGORITHMS: [Algorithm; 2] = [Algorithm::EdDSA, Algorithm::RS256];

/// Raw JWT claims as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default, alias = "tenant", skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Claims for `subject` expiring `ttl_secs` from now. A negative TTL
    /// produces an already-expired token.
    pub fn new(subject: impl Into<String>, ttl_secs: i64) -> Self {
        let now = now_epoch_seconds();
        Self {
            sub: subject.into(),
            tid: None,
            role: None,
            email_verified: false,
            exp: now + ttl_secs,
            iat: Some(now),
            iss: None,
            aud: None,
        }
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tid = Some(tenant.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn email_verified(mut self, verified: bool) -> Self {
        self.email_verified = verified;
        self
    }
}

/// Verified identity attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    subject: String,
    tenant: Option<String>,
    role: String,
    email_verified: bool,
    expires_at: SystemTime,
    key_epoch: u64,
}

impl ClaimSet {
    fn from_verified(claims: TokenClaims, key_epoch: u64) -> AuthzResult<Self> {
        if claims.sub.trim().is_empty() {
            return Err(AuthzError::InvalidToken(TokenRejection::MissingClaim));
        }
        let exp = u64::try_from(claims.exp)
            .map_err(|_| AuthzError::InvalidToken(TokenRejection::Expired))?;
        Ok(Self {
            subject: claims.sub,
            tenant: claims.tid.filter(|tenant| !tenant.is_empty()),
            role: claims
                .role
                .filter(|role| !role.is_empty())
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            email_verified: claims.email_verified,
            expires_at: UNIX_EPOCH + Duration::from_secs(exp),
            key_epoch,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Time left before `exp`, zero once passed.
    pub fn remaining_lifetime(&self, now: SystemTime) -> Duration {
        self.expires_at.duration_since(now).unwrap_or(Duration::ZERO)
    }

    /// Key epoch of the verifier snapshot that produced these claims.
    pub(crate) fn key_epoch(&self) -> u64 {
        self.key_epoch
    }

    #[cfg(test)]
    pub(crate) fn for_tests(subject: &str, tenant: Option<&str>, role: &str) -> Self {
        Self {
            subject: subject.to_string(),
            tenant: tenant.map(str::to_string),
            role: role.to_string(),
            email_verified: true,
            expires_at: SystemTime::now() + Duration::from_secs(3600),
            key_epoch: 0,
        }
    }
}

/// Public key used to check token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    alg: Algorithm,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    pub fn ed25519(kid: impl Into<String>, public_key: &[u8; 32]) -> AuthzResult<Self> {
        let x = URL_SAFE_NO_PAD.encode(public_key);
        Self::ed25519_x(kid, &x)
    }

    /// Ed25519 key from a base64url `x` coordinate as found in a JWK.
    pub fn ed25519_x(kid: impl Into<String>, x: &str) -> AuthzResult<Self> {
        let decoding_key = DecodingKey::from_ed_components(x)
            .map_err(|err| AuthzError::KeyMaterial(format!("ed25519 x: {err}")))?;
        Ok(Self {
            kid: kid.into(),
            alg: Algorithm::EdDSA,
            decoding_key,
        })
    }

    pub fn rsa_components(kid: impl Into<String>, n: &str, e: &str) -> AuthzResult<Self> {
        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| AuthzError::KeyMaterial(format!("rsa components: {err}")))?;
        Ok(Self {
            kid: kid.into(),
            alg: Algorithm::RS256,
            decoding_key,
        })
    }

    pub fn rsa_pem(kid: impl Into<String>, pem: &[u8]) -> AuthzResult<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(pem)
            .map_err(|err| AuthzError::KeyMaterial(format!("rsa pem: {err}")))?;
        Ok(Self {
            kid: kid.into(),
            alg: Algorithm::RS256,
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn alg(&self) -> Algorithm {
        self.alg
    }
}

/// Ordered, immutable set of verification keys.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<VerificationKey>,
}

impl KeySet {
    /// Fails on duplicate `kid`s.
    pub fn new(keys: Vec<VerificationKey>) -> AuthzResult<Self> {
        let mut seen = HashSet::new();
        for key in &keys {
            if !seen.insert(key.kid.as_str()) {
                return Err(AuthzError::KeyMaterial(format!(
                    "duplicate kid {}",
                    key.kid
                )));
            }
        }
        Ok(Self { keys })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Convert a JWKS document. Encryption keys and key types other than
    /// OKP/Ed25519 and RSA are skipped; malformed signing keys are errors.
    pub fn from_jwks(jwks: &Jwks) -> AuthzResult<Self> {
        let mut keys = Vec::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            if jwk.use_field == Some(KeyUse::Enc) {
                continue;
            }
            match jwk.kty.as_str() {
                "OKP" => {
                    if jwk.crv.as_deref() != Some("Ed25519") {
                        tracing::warn!(kid = %jwk.kid, crv = ?jwk.crv, "skipping unsupported OKP curve");
                        continue;
                    }
                    let x = jwk.x.as_deref().ok_or_else(|| {
                        AuthzError::KeyMaterial(format!("jwk {} missing x", jwk.kid))
                    })?;
                    keys.push(VerificationKey::ed25519_x(jwk.kid.clone(), x)?);
                }
                "RSA" => {
                    if let Some(alg) = jwk.alg.as_deref()
                        && alg != "RS256"
                    {
                        tracing::warn!(kid = %jwk.kid, alg, "skipping unsupported RSA algorithm");
                        continue;
                    }
                    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                        return Err(AuthzError::KeyMaterial(format!(
                            "jwk {} missing n/e",
                            jwk.kid
                        )));
                    };
                    keys.push(VerificationKey::rsa_components(jwk.kid.clone(), n, e)?);
                }
                other => {
                    tracing::warn!(kid = %jwk.kid, kty = other, "skipping unsupported key type");
                }
            }
        }
        if keys.is_empty() && !jwks.keys.is_empty() {
            return Err(AuthzError::KeyMaterial(
                "jwks contains no usable signing keys".to_string(),
            ));
        }
        Self::new(keys)
    }

    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.get(kid).is_some()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|key| key.kid.as_str())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Expectations applied on top of signature and expiry checks.
#[derive(Debug, Clone, Default)]
pub struct VerifierSettings {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Allowed clock skew in seconds.
    pub leeway_secs: u64,
}

pub struct TokenVerifier {
    settings: VerifierSettings,
    keys: ArcSwap<KeySet>,
    epoch: AtomicU64,
}

impl TokenVerifier {
    pub fn new(settings: VerifierSettings, keys: KeySet) -> Self {
        Self {
            settings,
            keys: ArcSwap::from_pointee(keys),
            epoch: AtomicU64::new(0),
        }
    }

    /// Replace the active key set. In-flight verifications finish against the
    /// snapshot they already loaded, and their claims carry the previous epoch.
    pub fn rotate_keys(&self, keys: KeySet) {
        self.keys.store(Arc::new(keys));
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Incremented once per rotation.
    pub fn key_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn key_set(&self) -> Arc<KeySet> {
        self.keys.load_full()
    }

    pub fn verify(&self, token: &str) -> AuthzResult<ClaimSet> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| AuthzError::InvalidToken(TokenRejection::Malformed))?;
        if !SUPPORTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthzError::InvalidToken(
                TokenRejection::UnsupportedAlgorithm,
            ));
        }

        // Epoch first: a rotation racing this load can only make it look older.
        let key_epoch = self.key_epoch();
        let keys = self.keys.load();
        let candidates: Vec<&VerificationKey> = match header.kid.as_deref() {
            Some(kid) => {
                let key = keys
                    .get(kid)
                    .ok_or(AuthzError::InvalidToken(TokenRejection::UnknownKey))?;
                // A kid bound to another algorithm is an algorithm-confusion attempt.
                if key.alg != header.alg {
                    return Err(AuthzError::InvalidToken(
                        TokenRejection::UnsupportedAlgorithm,
                    ));
                }
                vec![key]
            }
            None => keys.keys.iter().filter(|key| key.alg == header.alg).collect(),
        };
        if candidates.is_empty() {
            return Err(AuthzError::InvalidToken(TokenRejection::UnknownKey));
        }

        let validation = self.validation(header.alg);
        for key in candidates {
            match jsonwebtoken::decode::<TokenClaims>(token, &key.decoding_key, &validation) {
                Ok(data) => return ClaimSet::from_verified(data.claims, key_epoch),
                Err(err) if matches!(err.kind(), ErrorKind::InvalidSignature) => continue,
                Err(err) => return Err(AuthzError::InvalidToken(rejection_for(err.kind()))),
            }
        }
        Err(AuthzError::InvalidToken(TokenRejection::BadSignature))
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.settings.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        match self.settings.audience.as_deref() {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = self.settings.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

fn rejection_for(kind: &ErrorKind) -> TokenRejection {
    match kind {
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::InvalidSignature => TokenRejection::BadSignature,
        ErrorKind::InvalidIssuer => TokenRejection::IssuerMismatch,
        ErrorKind::InvalidAudience => TokenRejection::AudienceMismatch,
        ErrorKind::MissingRequiredClaim(_) => TokenRejection::MissingClaim,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenRejection::UnsupportedAlgorithm
        }
        _ => TokenRejection::Malformed,
    }
}

/// The `kid` named in a token header, if the header parses.
pub fn token_kid(token: &str) -> Option<String> {
    jsonwebtoken::decode_header(token)
        .ok()
        .and_then(|header| header.kid)
}

/// Private key used by [`TokenIssuer`].
pub struct SigningKey {
    kid: String,
    alg: Algorithm,
    encoding_key: EncodingKey,
}

impl SigningKey {
    /// Ed25519 signing key from a raw 32-byte seed.
    pub fn ed25519(kid: impl Into<String>, seed: &[u8; 32]) -> AuthzResult<Self> {
        let der = Ed25519SigningKey::from_bytes(seed)
            .to_pkcs8_der()
            .map_err(|err| AuthzError::KeyMaterial(format!("encode Ed25519 key: {err}")))?;
        Ok(Self {
            kid: kid.into(),
            alg: Algorithm::EdDSA,
            encoding_key: EncodingKey::from_ed_der(der.as_bytes()),
        })
    }

    pub fn rsa_pem(kid: impl Into<String>, pem: &[u8]) -> AuthzResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(pem)
            .map_err(|err| AuthzError::KeyMaterial(format!("rsa pem: {err}")))?;
        Ok(Self {
            kid: kid.into(),
            alg: Algorithm::RS256,
            encoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }
}

/// Public half of an Ed25519 seed, for pairing with [`SigningKey::ed25519`].
pub fn ed25519_public_key(seed: &[u8; 32]) -> [u8; 32] {
    Ed25519SigningKey::from_bytes(seed)
        .verifying_key()
        .to_bytes()
}

/// Mints tokens for tests and local development. Production tokens come from
/// the identity provider.
pub struct TokenIssuer {
    issuer: Option<String>,
    audience: Option<String>,
    key: SigningKey,
}

impl TokenIssuer {
    pub fn new(key: SigningKey) -> Self {
        Self {
            issuer: None,
            audience: None,
            key,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sign `claims`, filling `iss`/`aud` from the issuer when unset.
    pub fn mint(&self, claims: &TokenClaims) -> AuthzResult<String> {
        let mut claims = claims.clone();
        if claims.iss.is_none() {
            claims.iss = self.issuer.clone();
        }
        if claims.aud.is_none() {
            claims.aud = self.audience.clone().map(serde_json::Value::String);
        }
        let mut header = Header::new(self.key.alg);
        header.kid = Some(self.key.kid.clone());
        jsonwebtoken::encode(&header, &claims, &self.key.encoding_key)
            .map_err(|err| AuthzError::KeyMaterial(format!("sign token: {err}")))
    }
}

pub(crate) fn now_epoch_seconds() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
