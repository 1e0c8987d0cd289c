use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const VERIFIER_LEN: usize = 128;

const VERIFIER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Verifier and `state` for a single login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceSession {
    pub code_verifier: String,
    pub state: String,
}

impl PkceSession {
    pub fn new() -> Self {
        let code_verifier = generate_verifier(VERIFIER_LEN);
        let state = encode_state(&code_verifier);
        Self {
            code_verifier,
            state,
        }
    }

    pub fn challenge(&self) -> String {
        derive_challenge(&self.code_verifier)
    }
}

impl Default for PkceSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope carried in `state` so the verifier survives the redirect even
/// when the process-local copy is gone.
#[derive(Serialize, Deserialize)]
struct StateEnvelope {
    #[serde(rename = "codeVerifier")]
    code_verifier: String,
}

/// Random verifier drawn from the thread CSPRNG, one alphanumeric char per byte.
pub fn generate_verifier(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::fill(bytes.as_mut_slice());
    bytes
        .iter()
        .map(|b| VERIFIER_ALPHABET[*b as usize % VERIFIER_ALPHABET.len()] as char)
        .collect()
}

/// S256 challenge: `BASE64URL(SHA256(verifier))` without padding.
pub fn derive_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn encode_state(verifier: &str) -> String {
    let envelope = StateEnvelope {
        code_verifier: verifier.to_string(),
    };
    // Serializing a single string field cannot fail.
    let json = serde_json::to_vec(&envelope).unwrap_or_default();
    STANDARD.encode(json)
}

/// Extract the verifier from a `state` value; `None` if it is not ours.
pub fn decode_state(state: &str) -> Option<String> {
    let bytes = match STANDARD.decode(state.trim()) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(error = %e, "state parameter is not base64");
            return None;
        }
    };
    match serde_json::from_slice::<StateEnvelope>(&bytes) {
        Ok(env) if !env.code_verifier.is_empty() => Some(env.code_verifier),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "state parameter carries no verifier");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_has_requested_length_and_alphabet() {
        let v = generate_verifier(VERIFIER_LEN);
        assert_eq!(v.len(), 128);
        assert!(v.chars().all(|c| c.is_ascii_alphanumeric()), "{v}");
    }

    #[test]
    fn verifiers_differ() {
        assert_ne!(generate_verifier(64), generate_verifier(64));
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        // RFC 7636, Appendix B
        let challenge = derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn challenge_is_deterministic_and_url_safe() {
        for _ in 0..32 {
            let v = generate_verifier(VERIFIER_LEN);
            let c1 = derive_challenge(&v);
            let c2 = derive_challenge(&v);
            assert_eq!(c1, c2);
            assert!(!c1.contains(['+', '/', '=']), "{c1}");
        }
    }

    #[test]
    fn state_carries_verifier() {
        let v = generate_verifier(VERIFIER_LEN);
        let state = encode_state(&v);
        assert_eq!(decode_state(&state).as_deref(), Some(v.as_str()));
    }

    #[test]
    fn state_uses_camel_case_envelope() {
        let state = encode_state("abc");
        let json = STANDARD.decode(state).unwrap();
        assert_eq!(json, br#"{"codeVerifier":"abc"}"#);
    }

    #[test]
    fn foreign_state_decodes_to_none() {
        assert_eq!(decode_state("not base64 at all!"), None);
        assert_eq!(decode_state(&STANDARD.encode(b"{\"other\":1}")), None);
        assert_eq!(decode_state(&STANDARD.encode(b"{\"codeVerifier\":\"\"}")), None);
    }

    #[test]
    fn sessions_are_fresh() {
        let a = PkceSession::new();
        let b = PkceSession::new();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.state, b.state);
        assert_eq!(decode_state(&a.state).as_deref(), Some(a.code_verifier.as_str()));
    }
}
