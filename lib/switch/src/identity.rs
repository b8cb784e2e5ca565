use std::fmt;

use rand::{CryptoRng, RngCore};
use telehash_core::crypto::{self, CryptoResult, RsaPrivateKey, RsaPublicKey};
use telehash_core::encoding::{hex, EncodingError, EncodingResult};
use telehash_core::HASHNAME_SIZE;

/// The stable overlay identity of a node: SHA-256 of the DER encoded RSA
/// public key. Rendered as 64 lowercase hex characters on the wire.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct HashName([u8; HASHNAME_SIZE]);

impl HashName {
    #[inline]
    pub fn from_bytes(bytes: [u8; HASHNAME_SIZE]) -> HashName {
        HashName(bytes)
    }

    /// Derives the hashname bound to a DER encoded RSA public key.
    #[inline]
    pub fn from_public_der(der: &[u8]) -> HashName {
        HashName(crypto::sha256(&[der]))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; HASHNAME_SIZE] {
        &self.0
    }

    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    #[inline]
    pub fn from_hex(text: &str) -> EncodingResult<HashName> {
        if text.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(EncodingError::Hex);
        }

        hex::decode_exact(text).map(HashName)
    }
}

impl fmt::Display for HashName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HashName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HashName({})", self.to_hex())
    }
}

/// The local node identity: an RSA keypair and its derived hashname.
/// Immutable once constructed; supplied to the switch at construction.
pub struct Identity {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    public_der: Vec<u8>,
    hashname: HashName,
}

impl Identity {
    /// Generates a fresh identity with the default modulus size.
    #[inline]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> CryptoResult<Identity> {
        Self::generate_bits(rng, crypto::RSA_BITS)
    }

    /// Generates a fresh identity with an explicit modulus size. Sizes below
    /// the default are only appropriate for tests.
    pub fn generate_bits<R: RngCore + CryptoRng>(rng: &mut R, bits: usize) -> CryptoResult<Identity> {
        let private = crypto::rsa_generate(rng, bits)?;
        Self::from_keys(private)
    }

    /// Reconstructs an identity from persisted DER blobs.
    pub fn from_der(public_der: &[u8], private_der: &[u8]) -> CryptoResult<Identity> {
        let private = crypto::rsa_private_from_der(private_der)?;
        let identity = Self::from_keys(private)?;

        // The stored public blob is authoritative for the hashname binding.
        if identity.public_der != public_der {
            return Err(telehash_core::crypto::CryptoError::Der);
        }

        Ok(identity)
    }

    fn from_keys(private: RsaPrivateKey) -> CryptoResult<Identity> {
        let public = RsaPublicKey::from(&private);
        let public_der = crypto::rsa_public_der(&public)?;
        let hashname = HashName::from_public_der(&public_der);

        Ok(Identity {
            private,
            public,
            public_der,
            hashname,
        })
    }

    #[inline]
    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }

    #[inline]
    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    /// DER encoded public key; this is the byte string that crosses the wire
    /// inside open packets.
    #[inline]
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    #[inline]
    pub fn private_der(&self) -> CryptoResult<Vec<u8>> {
        crypto::rsa_private_der(&self.private)
    }

    #[inline]
    pub fn hashname(&self) -> &HashName {
        &self.hashname
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_hashname_is_pure_function_of_der() {
        let mut rng = StdRng::seed_from_u64(10);
        let identity = Identity::generate_bits(&mut rng, 1024).unwrap();

        let recomputed = HashName::from_public_der(identity.public_der());

        assert_eq!(*identity.hashname(), recomputed);
        assert_eq!(recomputed, HashName::from_public_der(identity.public_der()));
    }

    #[test]
    fn test_hashname_hex_roundtrip() {
        let name = HashName::from_bytes([0xab; HASHNAME_SIZE]);
        let text = name.to_hex();

        assert_eq!(text.len(), 64);
        assert_eq!(HashName::from_hex(&text).unwrap(), name);
    }

    #[test]
    fn test_hashname_rejects_uppercase() {
        let name = HashName::from_bytes([0xab; HASHNAME_SIZE]);
        let text = name.to_hex().to_uppercase();

        assert!(HashName::from_hex(&text).is_err());
    }

    #[test]
    fn test_identity_der_roundtrip() {
        let mut rng = StdRng::seed_from_u64(11);
        let identity = Identity::generate_bits(&mut rng, 1024).unwrap();

        let public = identity.public_der().to_vec();
        let private = identity.private_der().unwrap();

        let restored = Identity::from_der(&public, &private).unwrap();

        assert_eq!(restored.hashname(), identity.hashname());
        assert_eq!(restored.public_der(), identity.public_der());
    }

    #[test]
    fn test_identity_rejects_mismatched_blobs() {
        let mut rng = StdRng::seed_from_u64(12);
        let identity = Identity::generate_bits(&mut rng, 1024).unwrap();
        let other = Identity::generate_bits(&mut rng, 1024).unwrap();

        let private = identity.private_der().unwrap();

        assert!(Identity::from_der(other.public_der(), &private).is_err());
    }
}
