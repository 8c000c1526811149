//! Webhook authentication.
//!
//! The provider signs the exact request bytes with HMAC-SHA256 and sends the
//! hex digest in a header. Verification runs over the raw body before any
//! parsing; a re-serialized body would not match byte for byte.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("webhook signing secret is not configured")]
    MissingSecret,

    #[error("signature header is missing")]
    MissingSignature,

    #[error("signature header is not a hex digest")]
    Malformed,

    #[error("signature does not match the request body")]
    Mismatch,
}

/// Holds the shared signing secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Lower-case hex HMAC of `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String, SignatureError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check `header` against the HMAC of `body` in constant time.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let mut mac = self.mac()?;
        let header = header
            .map(str::trim)
            .filter(|header| !header.is_empty())
            .ok_or(SignatureError::MissingSignature)?;
        let expected = hex::decode(header).map_err(|_| SignatureError::Malformed)?;

        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }

    fn mac(&self) -> Result<HmacSha256, SignatureError> {
        if self.secret.is_empty() {
            return Err(SignatureError::MissingSecret);
        }
        HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::MissingSecret)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"event":"charge.success","data":{"reference":"METI_u1_pro_1"}}"#;

    #[test]
    fn known_vector_matches() {
        // RFC 4231 test case 2.
        let verifier = SignatureVerifier::new("Jefe");
        let signature = verifier
            .sign(b"what do ya want for nothing?")
            .expect("sign");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn correct_signature_verifies_in_either_case() {
        let verifier = SignatureVerifier::new("whsec");
        let signature = verifier.sign(BODY).expect("sign");

        assert_eq!(verifier.verify(BODY, Some(&signature)), Ok(()));
        assert_eq!(
            verifier.verify(BODY, Some(&signature.to_uppercase())),
            Ok(())
        );
    }

    #[test]
    fn flipping_any_byte_invalidates_the_signature() {
        let verifier = SignatureVerifier::new("whsec");
        let signature = verifier.sign(BODY).expect("sign");

        for index in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[index] ^= 0x01;
            assert_eq!(
                verifier.verify(&tampered, Some(&signature)),
                Err(SignatureError::Mismatch),
                "byte {index}"
            );
        }
    }

    #[test]
    fn missing_inputs_are_rejected() {
        let verifier = SignatureVerifier::new("whsec");
        assert_eq!(verifier.verify(BODY, None), Err(SignatureError::MissingSignature));
        assert_eq!(verifier.verify(BODY, Some("  ")), Err(SignatureError::MissingSignature));
        assert_eq!(verifier.verify(BODY, Some("zz")), Err(SignatureError::Malformed));
        assert_eq!(
            SignatureVerifier::new("").verify(BODY, Some("00")),
            Err(SignatureError::MissingSecret)
        );
    }

    #[test]
    fn debug_output_hides_the_secret() {
        assert!(!format!("{:?}", SignatureVerifier::new("hunter2")).contains("hunter2"));
    }
}
