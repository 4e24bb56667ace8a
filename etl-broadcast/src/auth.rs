//! Bearer-credential handshake for subscribers. This crate verifies a
//! credential handed to it; it does not issue or sign tokens.

use etl_core::TenantId;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing bearer credential")]
    Missing,
    #[error("policy violation: invalid credential")]
    Invalid,
}

/// A validated credential's decoded identity. A real implementation
/// verifies a JWT or opaque token against an external issuer; this crate
/// only prescribes the shape a verifier must return (subscriber identity
/// plus the tenant it is scoped to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub tenant_id: TenantId,
    pub subject_id: String,
}

/// A pluggable verification strategy: the broadcaster depends on this
/// trait, not on a specific token format.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Subject, CredentialError>;
}

pub fn validate_credential(
    verifier: &dyn CredentialVerifier,
    credential: Option<&str>,
) -> Result<Subject, CredentialError> {
    let credential = credential.ok_or(CredentialError::Missing)?;
    match verifier.verify(credential) {
        Ok(subject) => Ok(subject),
        Err(err) => {
            warn!(credential = %mask_credential(credential), "rejected subscriber credential");
            Err(err)
        }
    }
}

/// Mask all but the first and last few characters — credentials are never
/// logged in full.
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedVerifier {
        result: Result<Subject, CredentialError>,
    }

    impl CredentialVerifier for FixedVerifier {
        fn verify(&self, _credential: &str) -> Result<Subject, CredentialError> {
            self.result.clone()
        }
    }

    #[test]
    fn missing_credential_is_rejected_before_verification() {
        let verifier = FixedVerifier { result: Ok(Subject { tenant_id: TenantId(1), subject_id: "s".into() }) };
        assert_eq!(validate_credential(&verifier, None), Err(CredentialError::Missing));
    }

    #[test]
    fn invalid_credential_surfaces_policy_violation() {
        let verifier = FixedVerifier { result: Err(CredentialError::Invalid) };
        assert_eq!(validate_credential(&verifier, Some("bad-token")), Err(CredentialError::Invalid));
    }

    #[test]
    fn mask_preserves_only_head_and_tail() {
        assert_eq!(mask_credential("abcd1234efgh5678"), "abcd…5678");
        assert_eq!(mask_credential("short"), "*****");
    }
}
