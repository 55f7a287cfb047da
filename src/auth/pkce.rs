//! PKCE verifier/challenge and CSRF state generation

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

/// RFC 7636 unreserved characters
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Verifier length; RFC 7636 allows 43..=128
const VERIFIER_LEN: usize = 64;

/// Random bytes behind a state token (256 bits)
const STATE_BYTES: usize = 32;

/// PKCE code challenge data
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Code verifier, kept by the client until the exchange
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a fresh verifier and its S256 challenge
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let verifier: String = (0..VERIFIER_LEN)
            .map(|_| VERIFIER_CHARSET[rng.random_range(0..VERIFIER_CHARSET.len())] as char)
            .collect();
        let challenge = challenge_s256(&verifier);

        Self {
            verifier,
            challenge,
        }
    }

    /// The only challenge method this crate emits
    #[must_use]
    pub fn method(&self) -> &'static str {
        "S256"
    }
}

/// Derive the S256 code challenge for a verifier
#[must_use]
pub fn challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate an unguessable state token (base64url of 32 random bytes)
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_unreserved(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
    }

    #[test]
    fn test_pkce_challenge_generation() {
        let pkce = PkceChallenge::generate();
        assert!((43..=128).contains(&pkce.verifier.len()));
        assert!(pkce.verifier.chars().all(is_unreserved));
        // SHA-256 digest is 32 bytes -> 43 base64url chars
        assert_eq!(pkce.challenge.len(), 43);
        assert_eq!(pkce.challenge, challenge_s256(&pkce.verifier));
        assert_eq!(pkce.method(), "S256");
    }

    #[test]
    fn test_challenge_matches_rfc7636_appendix_b() {
        assert_eq!(
            challenge_s256("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_verifiers_are_not_repeated() {
        let verifiers: HashSet<String> = (0..32)
            .map(|_| PkceChallenge::generate().verifier)
            .collect();
        assert_eq!(verifiers.len(), 32);
    }

    #[test]
    fn test_state_is_url_safe_and_long_enough() {
        let state = generate_state();
        assert_eq!(state.len(), 43);
        assert!(
            state
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(state, generate_state());
    }
}
