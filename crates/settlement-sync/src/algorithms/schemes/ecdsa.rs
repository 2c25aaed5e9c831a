//! ECDSA over secp256k1.
//!
//! Keys are stored as 20-byte addresses. Signatures are 65 bytes
//! `r || s || v` over the keccak-256 of the message; the signer is
//! recovered and compared with the stored address.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use super::KeyScheme;
use crate::domain::{keccak256, Address, KeyType};

/// `r || s || v`
pub const ECDSA_SIGNATURE_LEN: usize = 65;

/// ECDSA secp256k1 scheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct EcdsaScheme;

/// Address of a secp256k1 public key: last 20 bytes of keccak(x || y).
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

fn parse_recovery_id(v: u8) -> Option<RecoveryId> {
    let id = match v {
        0 | 27 => 0,
        1 | 28 => 1,
        _ => return None,
    };
    RecoveryId::try_from(id).ok()
}

fn recover_address(message: &[u8], signature: &[u8]) -> Option<Address> {
    if signature.len() != ECDSA_SIGNATURE_LEN {
        return None;
    }
    let recovery_id = parse_recovery_id(signature[64])?;
    let sig = Signature::from_slice(&signature[..64]).ok()?;

    // Malleable (high-s) signatures are rejected
    if sig.normalize_s().is_some() {
        return None;
    }

    let digest = keccak256(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id).ok()?;
    Some(address_from_verifying_key(&key))
}

impl KeyScheme for EcdsaScheme {
    fn key_type(&self) -> KeyType {
        KeyType::ECDSA_SECP256K1
    }

    fn name(&self) -> &'static str {
        "ecdsa-secp256k1"
    }

    fn validate_key(&self, payload: &[u8]) -> Result<(), String> {
        if payload.len() != 20 {
            return Err(format!("expected 20-byte address, got {} bytes", payload.len()));
        }
        if payload.iter().all(|b| *b == 0) {
            return Err("zero address".to_string());
        }
        Ok(())
    }

    fn verify(&self, payload: &[u8], signature: &[u8], message: &[u8]) -> bool {
        match recover_address(message, signature) {
            Some(recovered) => recovered.as_slice() == payload,
            None => false,
        }
    }
}
