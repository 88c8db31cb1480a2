use thiserror::Error;

/// Why a token was rejected.
///
/// Carried inside [`AuthzError::InvalidToken`] for logging and metrics only.
/// The `Display` form of the outer error never includes it, so callers cannot
/// tell an expired token from a forged one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenRejection {
    Malformed,
    UnsupportedAlgorithm,
    UnknownKey,
    BadSignature,
    Expired,
    IssuerMismatch,
    AudienceMismatch,
    MissingClaim,
    KeyLookupTimeout,
    KeyLookupFailed,
}

impl TokenRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::UnsupportedAlgorithm => "unsupported_algorithm",
            TokenRejection::UnknownKey => "unknown_key",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::Expired => "expired",
            TokenRejection::IssuerMismatch => "issuer_mismatch",
            TokenRejection::AudienceMismatch => "audience_mismatch",
            TokenRejection::MissingClaim => "missing_claim",
            TokenRejection::KeyLookupTimeout => "key_lookup_timeout",
            TokenRejection::KeyLookupFailed => "key_lookup_failed",
        }
    }
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid token")]
    InvalidToken(TokenRejection),
    #[error("rule {rule} failed to evaluate: {message}")]
    RuleEvaluation { rule: String, message: String },
    #[error("policy load failed: {0}")]
    PolicyLoad(String),
    #[error("claim cache unavailable: {0}")]
    Cache(String),
    #[error("invalid key material: {0}")]
    KeyMaterial(String),
}

impl AuthzError {
    pub fn rule_fault(rule: impl Into<String>, message: impl Into<String>) -> Self {
        AuthzError::RuleEvaluation {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn policy_load(message: impl Into<String>) -> Self {
        AuthzError::PolicyLoad(message.into())
    }

    /// Rejection kind when this is an `InvalidToken` error.
    pub fn rejection(&self) -> Option<TokenRejection> {
        match self {
            AuthzError::InvalidToken(kind) => Some(*kind),
            _ => None,
        }
    }
}

pub type AuthzResult<T> = Result<T, AuthzError>;
