//! BLS12-381 keys, signatures, and indexed validator-set verification.
//!
//! Every protocol signature is BLS (min_pk: 48-byte public keys, 96-byte
//! signatures) so that a quorum of votes aggregates into one signature
//! checked against the aggregated public key of the signer bitfield.

use crate::SignerBitfield;
use std::fmt;

/// Errors from key handling, signing and aggregation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Key bytes failed to parse.
    #[error("invalid key material")]
    InvalidKey,

    /// Signature bytes failed to parse.
    #[error("invalid signature encoding")]
    InvalidSignature,

    /// Nothing to aggregate.
    #[error("cannot aggregate an empty list")]
    Empty,

    /// The underlying aggregation operation failed.
    #[error("aggregation failed")]
    AggregationFailed,
}

/// A BLS12-381 key pair.
#[derive(Clone)]
pub struct BlsKeyPair(blst::min_pk::SecretKey);

impl BlsKeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        let sk = blst::min_pk::SecretKey::key_gen(&ikm, &[]).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(sk))
    }

    /// Generate a keypair from a 32-byte seed (for tests).
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let sk = blst::min_pk::SecretKey::key_gen(seed, &[]).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(sk))
    }

    /// Parse a secret key from its hex encoding.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| CryptoError::InvalidKey)?;
        let sk =
            blst::min_pk::SecretKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(sk))
    }

    /// Hex encoding of the secret key (written to `private_key.txt`).
    pub fn secret_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// Hex encoding of the public key.
    pub fn public_hex(&self) -> String {
        hex::encode(self.0.sk_to_pk().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.0.sign(message, &[], &[]).to_bytes().to_vec()
    }
}

impl fmt::Debug for BlsKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsKeyPair({}..)", &self.public_hex()[..8])
    }
}

/// The replica's signing identity.
#[derive(Debug, Clone)]
pub struct Signer {
    keypair: BlsKeyPair,
}

impl Signer {
    /// Wrap a keypair.
    pub fn new(keypair: BlsKeyPair) -> Self {
        Self { keypair }
    }

    /// Sign arbitrary message bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message)
    }

    /// Public key hex of this signer.
    pub fn public_hex(&self) -> String {
        self.keypair.public_hex()
    }
}

/// An indexed set of validator public keys.
#[derive(Clone)]
pub struct Verifier {
    keys: Vec<blst::min_pk::PublicKey>,
}

impl Verifier {
    /// Build a verifier from hex-encoded public keys, in validator order.
    pub fn new<S: AsRef<str>>(pubkeys_hex: &[S]) -> Result<Self, CryptoError> {
        let mut keys = Vec::with_capacity(pubkeys_hex.len());
        for pk_hex in pubkeys_hex {
            let bytes = hex::decode(pk_hex.as_ref().trim()).map_err(|_| CryptoError::InvalidKey)?;
            let pk = blst::min_pk::PublicKey::from_bytes(&bytes)
                .map_err(|_| CryptoError::InvalidKey)?;
            keys.push(pk);
        }
        Ok(Self { keys })
    }

    /// Number of validators in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify an individual signature from validator `index`.
    pub fn verify(&self, signature: &[u8], message: &[u8], index: usize) -> bool {
        let Some(pk) = self.keys.get(index) else {
            return false;
        };
        let Ok(sig) = blst::min_pk::Signature::from_bytes(signature) else {
            return false;
        };
        sig.verify(true, message, &[], &[], pk, true) == blst::BLST_ERROR::BLST_SUCCESS
    }

    /// Verify an aggregated signature over one message against the
    /// aggregated public key of the bitfield's set bits.
    pub fn verify_aggregate(
        &self,
        signature: &[u8],
        message: &[u8],
        signers: &SignerBitfield,
    ) -> bool {
        let contributors: Vec<&blst::min_pk::PublicKey> = signers
            .set_indices()
            .filter_map(|i| self.keys.get(i))
            .collect();
        if contributors.is_empty() || contributors.len() != signers.count_ones() {
            return false;
        }

        let Ok(agg) = blst::min_pk::AggregatePublicKey::aggregate(&contributors, false) else {
            return false;
        };
        let Ok(sig) = blst::min_pk::Signature::from_bytes(signature) else {
            return false;
        };
        sig.verify(true, message, &[], &[], &agg.to_public_key(), false)
            == blst::BLST_ERROR::BLST_SUCCESS
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Verifier({} keys)", self.keys.len())
    }
}

/// Aggregate individual BLS signatures into one.
pub fn aggregate_signatures<S: AsRef<[u8]>>(signatures: &[S]) -> Result<Vec<u8>, CryptoError> {
    if signatures.is_empty() {
        return Err(CryptoError::Empty);
    }

    let parsed: Vec<blst::min_pk::Signature> = signatures
        .iter()
        .filter_map(|s| blst::min_pk::Signature::from_bytes(s.as_ref()).ok())
        .collect();
    if parsed.len() != signatures.len() {
        return Err(CryptoError::InvalidSignature);
    }

    let refs: Vec<&blst::min_pk::Signature> = parsed.iter().collect();
    let agg = blst::min_pk::AggregateSignature::aggregate(&refs, true)
        .map_err(|_| CryptoError::AggregationFailed)?;

    Ok(agg.to_signature().to_bytes().to_vec())
}
