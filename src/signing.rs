//! RSA container signing and validation.
//!
//! A signed container stores two PKCS#1 v1.5 signatures in its TOC: one over
//! the raw header bytes, one over the concatenation of all per-block SHA-1
//! digests.  Validation recomputes both digests independently and verifies
//! each signature with the public key; any mismatch is a hard
//! `SignatureError`.  This is a trust boundary, so failures are never
//! softened into warnings.
//!
//! Keys are explicit values handed to the writer/reader.  There is no
//! process-global crypto provider; tests inject throwaway keys the same way
//! production callers inject real ones.

use std::fmt;

use rsa::pkcs1v15::{Signature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

pub const SHA1_DIGEST_SIZE: usize = 20;

// ── SHA-1 digests ────────────────────────────────────────────────────────────

/// A raw SHA-1 digest, as stored in the TOC per compression block.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Sha1Digest(pub [u8; SHA1_DIGEST_SIZE]);

impl Sha1Digest {
    pub fn as_bytes(&self) -> &[u8; SHA1_DIGEST_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Digest({})", hex::encode(self.0))
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

pub fn sha1_digest(data: &[u8]) -> Sha1Digest {
    let mut hasher = Sha1::new();
    hasher.update(data);
    Sha1Digest(hasher.finalize().into())
}

// ── Keys ─────────────────────────────────────────────────────────────────────

/// Private signing key injected into the container writer.
#[derive(Clone)]
pub struct SigningKeyPair {
    private: RsaPrivateKey,
}

impl SigningKeyPair {
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        Self { private }
    }

    /// Generate a fresh key pair.  Intended for tests and tooling; real
    /// deployments load an existing key.
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| Error::Signature(format!("failed to generate RSA key: {e}")))?;
        Ok(Self { private })
    }

    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey {
            public: RsaPublicKey::from(&self.private),
        }
    }

    /// Signature size in bytes (the RSA modulus size).
    pub fn signature_size(&self) -> usize {
        self.private.size()
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKeyPair(..)")
    }
}

/// Public verification key injected into the container reader.  Providing
/// one turns signature enforcement on.
#[derive(Clone)]
pub struct VerifyKey {
    public: RsaPublicKey,
}

impl VerifyKey {
    pub fn from_public_key(public: RsaPublicKey) -> Self {
        Self { public }
    }

    /// Build a key from raw big-endian modulus and exponent bytes.
    pub fn from_components(modulus: &[u8], exponent: &[u8]) -> Result<Self> {
        let n = BigUint::from_bytes_be(modulus);
        let e = BigUint::from_bytes_be(exponent);
        let public = RsaPublicKey::new(n, e)
            .map_err(|e| Error::Signature(format!("invalid RSA key components: {e}")))?;
        Ok(Self { public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }
}

impl fmt::Debug for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VerifyKey(..)")
    }
}

// ── Sign / validate ──────────────────────────────────────────────────────────

fn concat_block_hashes(block_hashes: &[Sha1Digest]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(block_hashes.len() * SHA1_DIGEST_SIZE);
    for hash in block_hashes {
        buf.extend_from_slice(hash.as_bytes());
    }
    buf
}

/// Produce the TOC signature pair: `sign(header_bytes)` and
/// `sign(concat(block_hashes))`.  Both signatures are `signature_size()`
/// bytes long.
pub fn create_container_signature(
    key: &SigningKeyPair,
    header_bytes: &[u8],
    block_hashes: &[Sha1Digest],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let signer = RsaSigningKey::<Sha1>::new(key.private.clone());

    let toc_signature = signer
        .try_sign(header_bytes)
        .map_err(|e| Error::Signature(format!("failed to sign TOC header: {e}")))?
        .to_vec();

    let block_signature = signer
        .try_sign(&concat_block_hashes(block_hashes))
        .map_err(|e| Error::Signature(format!("failed to sign block hashes: {e}")))?
        .to_vec();

    if toc_signature.is_empty() || block_signature.is_empty() {
        return Err(Error::Signature("signing produced an empty signature".into()));
    }
    Ok((toc_signature, block_signature))
}

/// Verify a stored signature pair against the header bytes and the per-block
/// hash array.  All failure modes (malformed signature, wrong key, tampered
/// header or hash array) report `SignatureError`.
pub fn validate_container_signature(
    key: &VerifyKey,
    header_bytes: &[u8],
    block_hashes: &[Sha1Digest],
    toc_signature: &[u8],
    block_signature: &[u8],
) -> Result<()> {
    let verifier = RsaVerifyingKey::<Sha1>::new(key.public.clone());

    let toc_sig = Signature::try_from(toc_signature)
        .map_err(|e| Error::Signature(format!("malformed TOC signature: {e}")))?;
    verifier
        .verify(header_bytes, &toc_sig)
        .map_err(|_| Error::Signature("invalid TOC signature".into()))?;

    let block_sig = Signature::try_from(block_signature)
        .map_err(|e| Error::Signature(format!("malformed block signature: {e}")))?;
    verifier
        .verify(&concat_block_hashes(block_hashes), &block_sig)
        .map_err(|_| Error::Signature("invalid block signature".into()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1024-bit keys keep the test suite fast; production uses 2048+.
    fn test_key() -> SigningKeyPair {
        SigningKeyPair::generate(1024).unwrap()
    }

    #[test]
    fn sign_and_validate() {
        let key = test_key();
        let header = vec![0xA5u8; 144];
        let hashes = vec![sha1_digest(b"block 0"), sha1_digest(b"block 1")];

        let (toc_sig, block_sig) = create_container_signature(&key, &header, &hashes).unwrap();
        assert_eq!(toc_sig.len(), key.signature_size());
        assert_eq!(block_sig.len(), key.signature_size());

        validate_container_signature(&key.verify_key(), &header, &hashes, &toc_sig, &block_sig)
            .unwrap();
    }

    #[test]
    fn tampered_header_fails() {
        let key = test_key();
        let header = vec![0x11u8; 144];
        let hashes = vec![sha1_digest(b"block")];
        let (toc_sig, block_sig) = create_container_signature(&key, &header, &hashes).unwrap();

        let mut tampered = header.clone();
        tampered[37] ^= 0x01;
        assert!(matches!(
            validate_container_signature(
                &key.verify_key(),
                &tampered,
                &hashes,
                &toc_sig,
                &block_sig
            ),
            Err(Error::Signature(_))
        ));
    }

    #[test]
    fn tampered_block_hash_fails() {
        let key = test_key();
        let header = vec![0x22u8; 144];
        let hashes = vec![sha1_digest(b"block 0"), sha1_digest(b"block 1")];
        let (toc_sig, block_sig) = create_container_signature(&key, &header, &hashes).unwrap();

        let mut tampered = hashes.clone();
        tampered[1].0[5] ^= 0x80;
        assert!(matches!(
            validate_container_signature(
                &key.verify_key(),
                &header,
                &tampered,
                &toc_sig,
                &block_sig
            ),
            Err(Error::Signature(_))
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_key();
        let other = test_key();
        let header = vec![0x33u8; 144];
        let hashes = vec![sha1_digest(b"block")];
        let (toc_sig, block_sig) = create_container_signature(&key, &header, &hashes).unwrap();

        assert!(matches!(
            validate_container_signature(
                &other.verify_key(),
                &header,
                &hashes,
                &toc_sig,
                &block_sig
            ),
            Err(Error::Signature(_))
        ));
    }

    #[test]
    fn verify_key_from_components() {
        let key = test_key();
        let public = RsaPublicKey::from(&key.private);
        let rebuilt =
            VerifyKey::from_components(&public.n().to_bytes_be(), &public.e().to_bytes_be())
                .unwrap();

        let header = vec![0x44u8; 144];
        let hashes = vec![sha1_digest(b"block")];
        let (toc_sig, block_sig) = create_container_signature(&key, &header, &hashes).unwrap();
        validate_container_signature(&rebuilt, &header, &hashes, &toc_sig, &block_sig).unwrap();
    }
}
