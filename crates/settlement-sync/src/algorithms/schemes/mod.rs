//! # Signature Schemes
//!
//! Key-type dispatch for key validation and signature checks.
//!
//! The quorum verifier and key resolver never match on a key type; they
//! ask the [`SchemeRegistry`] for the strategy registered under the tag's
//! high nibble. Adding a scheme means registering one more [`KeyScheme`].

mod bls;
mod ecdsa;

pub use bls::{BlsScheme, BLS_DST, BLS_PUBLIC_KEY_LEN, BLS_SIGNATURE_LEN};
pub use ecdsa::{address_from_verifying_key, EcdsaScheme, ECDSA_SIGNATURE_LEN};

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{KeyTag, KeyType, SettlementError, SettlementResult};

/// Verification strategy for one key type.
pub trait KeyScheme: Send + Sync {
    /// Key type this scheme serves.
    fn key_type(&self) -> KeyType;

    /// Human-readable scheme name.
    fn name(&self) -> &'static str;

    /// Check that `payload` is a well-formed key of this scheme.
    fn validate_key(&self, payload: &[u8]) -> Result<(), String>;

    /// Verify `signature` over `message` against the key `payload`.
    fn verify(&self, payload: &[u8], signature: &[u8], message: &[u8]) -> bool;

    /// Verify a proof-of-possession for `payload`.
    ///
    /// `extra_data` carries scheme-specific auxiliary material; the built-in
    /// schemes need none and check `signature` as an ordinary signature.
    fn verify_possession(
        &self,
        payload: &[u8],
        signature: &[u8],
        message: &[u8],
        extra_data: &[u8],
    ) -> bool {
        let _ = extra_data;
        self.verify(payload, signature, message)
    }

    /// Verify one aggregate signature by every key in `payloads` over `message`.
    ///
    /// `None` if the scheme has no aggregation.
    fn verify_aggregate(
        &self,
        payloads: &[&[u8]],
        signature: &[u8],
        message: &[u8],
    ) -> Option<bool> {
        let _ = (payloads, signature, message);
        None
    }
}

/// Key type → scheme registry.
#[derive(Clone)]
pub struct SchemeRegistry {
    schemes: HashMap<KeyType, Arc<dyn KeyScheme>>,
}

impl SchemeRegistry {
    /// Registry without any scheme.
    pub fn empty() -> Self {
        Self {
            schemes: HashMap::new(),
        }
    }

    /// Registry with ECDSA secp256k1 and BLS12-381.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(EcdsaScheme));
        registry.register(Arc::new(BlsScheme));
        registry
    }

    /// Add or replace the scheme for its key type.
    pub fn register(&mut self, scheme: Arc<dyn KeyScheme>) {
        self.schemes.insert(scheme.key_type(), scheme);
    }

    /// Scheme for `tag`.
    pub fn get(&self, tag: KeyTag) -> SettlementResult<&Arc<dyn KeyScheme>> {
        self.schemes
            .get(&tag.key_type())
            .ok_or(SettlementError::InvalidKeyType(tag))
    }

    /// Whether `tag` maps to a registered scheme.
    pub fn is_recognized(&self, tag: KeyTag) -> bool {
        self.schemes.contains_key(&tag.key_type())
    }

    /// Validate `payload` for `tag`.
    pub fn validate_key(&self, tag: KeyTag, payload: &[u8]) -> SettlementResult<()> {
        self.get(tag)?
            .validate_key(payload)
            .map_err(|reason| SettlementError::InvalidKeyFormat { tag, reason })
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.schemes.values().map(|s| s.name()).collect();
        names.sort_unstable();
        f.debug_struct("SchemeRegistry").field("schemes", &names).finish()
    }
}
