//! BLS12-381 (min_sig: public keys in G2, signatures in G1).

use blst::min_sig::{PublicKey, Signature};
use blst::BLST_ERROR;

use super::KeyScheme;
use crate::domain::KeyType;

/// Domain separation tag (proof-of-possession ciphersuite).
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Compressed G2 public key.
pub const BLS_PUBLIC_KEY_LEN: usize = 96;

/// Compressed G1 signature.
pub const BLS_SIGNATURE_LEN: usize = 48;

/// BLS12-381 scheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlsScheme;

impl KeyScheme for BlsScheme {
    fn key_type(&self) -> KeyType {
        KeyType::BLS12_381
    }

    fn name(&self) -> &'static str {
        "bls12-381"
    }

    fn validate_key(&self, payload: &[u8]) -> Result<(), String> {
        if payload.len() != BLS_PUBLIC_KEY_LEN {
            return Err(format!(
                "expected {BLS_PUBLIC_KEY_LEN}-byte G2 key, got {} bytes",
                payload.len()
            ));
        }
        PublicKey::key_validate(payload)
            .map(|_| ())
            .map_err(|e| format!("invalid G2 point: {e:?}"))
    }

    fn verify(&self, payload: &[u8], signature: &[u8], message: &[u8]) -> bool {
        let Ok(sig) = Signature::from_bytes(signature) else {
            return false;
        };
        let Ok(pk) = PublicKey::from_bytes(payload) else {
            return false;
        };
        sig.verify(true, message, BLS_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
    }

    fn verify_aggregate(
        &self,
        payloads: &[&[u8]],
        signature: &[u8],
        message: &[u8],
    ) -> Option<bool> {
        if payloads.is_empty() {
            return Some(false);
        }
        let Ok(sig) = Signature::from_bytes(signature) else {
            return Some(false);
        };

        let pks: Vec<PublicKey> = payloads
            .iter()
            .filter_map(|p| PublicKey::from_bytes(p).ok())
            .collect();
        if pks.len() != payloads.len() {
            return Some(false);
        }

        let pk_refs: Vec<&PublicKey> = pks.iter().collect();
        let msgs: Vec<&[u8]> = vec![message; pk_refs.len()];
        Some(sig.aggregate_verify(true, &msgs, BLS_DST, &pk_refs, true) == BLST_ERROR::BLST_SUCCESS)
    }
}
