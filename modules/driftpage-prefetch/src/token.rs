//! Signed, short-lived tokens identifying queue records for peek/take.
//!
//! HS256 over `{kind, ident, exp}`. Without a configured secret, tokens are
//! signed with a per-process random key and do not survive restarts.

use driftpage_common::DriftpageError;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

const TOKEN_KIND: &str = "prefetch_take";
pub const TOKEN_TTL_SECS: i64 = 600;

#[derive(Debug, Serialize, Deserialize)]
struct TakeClaims {
    kind: String,
    ident: String,
    exp: i64,
}

pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: Option<&str>, ttl_secs: i64) -> Self {
        let secret = secret
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn sign(&self, ident: &str) -> Option<String> {
        let claims = TakeClaims {
            kind: TOKEN_KIND.to_string(),
            ident: ident.to_string(),
            exp: chrono::Utc::now().timestamp() + self.ttl_secs,
        };
        encode(&Header::default(), &claims, &self.encoding_key).ok()
    }

    /// Verify signature, expiry and identifier shape; returns the record
    /// identifier.
    pub fn verify(&self, token: &str) -> Result<String, DriftpageError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let claims = decode::<TakeClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| DriftpageError::Token(e.to_string()))?
            .claims;
        if claims.kind != TOKEN_KIND {
            return Err(DriftpageError::Token("wrong token kind".into()));
        }
        if claims.ident.is_empty()
            || claims.ident.contains('/')
            || claims.ident.contains('\\')
            || claims.ident.contains("..")
        {
            return Err(DriftpageError::Token("unsafe record identifier".into()));
        }
        Ok(claims.ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let signer = TokenSigner::new(Some("secret"), TOKEN_TTL_SECS);
        let token = signer.sign("1234-abcd1234").unwrap();
        assert_eq!(signer.verify(&token).unwrap(), "1234-abcd1234");
    }

    #[test]
    fn rejects_other_secrets() {
        let a = TokenSigner::new(Some("secret-a"), TOKEN_TTL_SECS);
        let b = TokenSigner::new(Some("secret-b"), TOKEN_TTL_SECS);
        let token = a.sign("id").unwrap();
        assert!(b.verify(&token).is_err());
    }

    #[test]
    fn random_keys_differ_per_process_instance() {
        let a = TokenSigner::new(None, TOKEN_TTL_SECS);
        let b = TokenSigner::new(None, TOKEN_TTL_SECS);
        let token = a.sign("id").unwrap();
        assert!(a.verify(&token).is_ok());
        assert!(b.verify(&token).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let signer = TokenSigner::new(Some("secret"), -30);
        let token = signer.sign("id").unwrap();
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn rejects_path_traversal_identifiers() {
        let signer = TokenSigner::new(Some("secret"), TOKEN_TTL_SECS);
        for ident in ["../etc/passwd", "a/b", "a\\b"] {
            let token = signer.sign(ident).unwrap();
            assert!(signer.verify(&token).is_err(), "ident={ident}");
        }
    }

    #[test]
    fn rejects_garbage() {
        let signer = TokenSigner::new(Some("secret"), TOKEN_TTL_SECS);
        assert!(signer.verify("not-a-token").is_err());
    }
}
