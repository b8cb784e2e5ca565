use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use ctr::Ctr128BE;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{CryptoRng, RngCore};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, Pkcs1v15Sign};
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub use p256::PublicKey as EcPublicKey;
pub use rsa::{RsaPrivateKey, RsaPublicKey};

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const DIGEST_SIZE: usize = 32;
/// ANSI X9.63 uncompressed point size for P-256.
pub const EC_POINT_SIZE: usize = 65;
/// Default RSA modulus size for freshly generated identities.
pub const RSA_BITS: usize = 2048;

type Aes256Ctr = Ctr128BE<Aes256>;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CryptoError {
    Rsa,
    EcPoint,
    Der,
}

/// SHA-256 over the concatenation of the supplied parts.
#[inline]
pub fn sha256(parts: &[&[u8]]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Fills the provided buffer with cryptographically secure random bytes.
#[inline]
pub fn random_bytes<R: RngCore + CryptoRng>(rng: &mut R, out: &mut [u8]) {
    rng.fill_bytes(out);
}

/// Applies the AES-256-CTR keystream to `data` in place. Encryption and
/// decryption are the same operation.
#[inline]
pub fn aes_ctr(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], data: &mut [u8]) {
    let mut cipher =
        Aes256Ctr::new_from_slices(&key[..], &iv[..]).expect("Key and IV sizes are fixed");
    cipher.apply_keystream(data);
}

/// Generates a fresh RSA keypair.
#[inline]
pub fn rsa_generate<R: RngCore + CryptoRng>(rng: &mut R, bits: usize) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::new(rng, bits).map_err(|_| CryptoError::Rsa)
}

/// DER encodes an RSA public key (SubjectPublicKeyInfo).
#[inline]
pub fn rsa_public_der(key: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| CryptoError::Der)
}

#[inline]
pub fn rsa_public_from_der(der: &[u8]) -> CryptoResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|_| CryptoError::Der)
}

/// DER encodes an RSA private key (PKCS#8).
#[inline]
pub fn rsa_private_der(key: &RsaPrivateKey) -> CryptoResult<Vec<u8>> {
    key.to_pkcs8_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| CryptoError::Der)
}

#[inline]
pub fn rsa_private_from_der(der: &[u8]) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(der).map_err(|_| CryptoError::Der)
}

/// RSA-OAEP encryption with SHA-1 hash and SHA-1 MGF1. The digest choice is
/// part of the wire protocol and must not change.
#[inline]
pub fn rsa_oaep_encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &RsaPublicKey,
    plain: &[u8],
) -> CryptoResult<Vec<u8>> {
    key.encrypt(rng, Oaep::new::<Sha1>(), plain)
        .map_err(|_| CryptoError::Rsa)
}

#[inline]
pub fn rsa_oaep_decrypt(key: &RsaPrivateKey, cipher: &[u8]) -> CryptoResult<Vec<u8>> {
    key.decrypt(Oaep::new::<Sha1>(), cipher)
        .map_err(|_| CryptoError::Rsa)
}

/// RSA-PKCS1v1.5 signature over the SHA-256 digest of `data`.
#[inline]
pub fn rsa_sign(key: &RsaPrivateKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    let digest = Sha256::digest(data);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), digest.as_slice())
        .map_err(|_| CryptoError::Rsa)
}

#[inline]
pub fn rsa_verify(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(data);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), digest.as_slice(), signature)
        .is_ok()
}

/// An ephemeral NIST P-256 keypair used for one open exchange.
pub struct EcKeyPair {
    secret: EphemeralSecret,
    public: EcPublicKey,
}

impl EcKeyPair {
    /// Encoded public half in ANSI X9.63 uncompressed form.
    #[inline]
    pub fn public_bytes(&self) -> [u8; EC_POINT_SIZE] {
        ec_public_bytes(&self.public)
    }

    /// ECDH shared secret with the peer's public key.
    #[inline]
    pub fn agree(&self, peer: &EcPublicKey) -> [u8; KEY_SIZE] {
        let shared = self.secret.diffie_hellman(peer);
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(shared.raw_secret_bytes().as_ref());
        out
    }
}

/// Generates a fresh ephemeral EC keypair on P-256.
#[inline]
pub fn ec_generate<R: RngCore + CryptoRng>(rng: &mut R) -> EcKeyPair {
    let secret = EphemeralSecret::random(rng);
    let public = EcPublicKey::from(&secret);
    EcKeyPair { secret, public }
}

#[inline]
pub fn ec_public_bytes(key: &EcPublicKey) -> [u8; EC_POINT_SIZE] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; EC_POINT_SIZE];
    out.copy_from_slice(point.as_bytes());
    out
}

#[inline]
pub fn ec_public_from_bytes(bytes: &[u8]) -> CryptoResult<EcPublicKey> {
    if bytes.len() != EC_POINT_SIZE {
        return Err(CryptoError::EcPoint);
    }
    EcPublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::EcPoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sha256_concatenation() {
        let joined = sha256(&[b"hello ", b"world"]);
        let whole = sha256(&[b"hello world"]);
        assert_eq!(joined, whole);
    }

    #[test]
    fn test_aes_ctr_roundtrip() {
        let key = [7u8; KEY_SIZE];
        let iv = [9u8; IV_SIZE];
        let plain = b"a small message".to_vec();

        let mut data = plain.clone();
        aes_ctr(&key, &iv, &mut data);
        assert_ne!(data, plain);

        aes_ctr(&key, &iv, &mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn test_aes_ctr_iv_sensitivity() {
        let key = [7u8; KEY_SIZE];
        let plain = b"a small message".to_vec();

        let mut data = plain.clone();
        aes_ctr(&key, &[1u8; IV_SIZE], &mut data);
        aes_ctr(&key, &[2u8; IV_SIZE], &mut data);
        assert_ne!(data, plain);
    }

    #[test]
    fn test_rsa_oaep_roundtrip() {
        let mut rng = StdRng::seed_from_u64(1);
        let private = rsa_generate(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        let cipher = rsa_oaep_encrypt(&mut rng, &public, b"ec point bytes").unwrap();
        let plain = rsa_oaep_decrypt(&private, &cipher).unwrap();

        assert_eq!(&plain[..], b"ec point bytes");
    }

    #[test]
    fn test_rsa_oaep_wrong_key() {
        let mut rng = StdRng::seed_from_u64(2);
        let private = rsa_generate(&mut rng, 1024).unwrap();
        let other = rsa_generate(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        let cipher = rsa_oaep_encrypt(&mut rng, &public, b"ec point bytes").unwrap();

        assert_eq!(rsa_oaep_decrypt(&other, &cipher), Err(CryptoError::Rsa));
    }

    #[test]
    fn test_rsa_sign_verify() {
        let mut rng = StdRng::seed_from_u64(3);
        let private = rsa_generate(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        let signature = rsa_sign(&private, b"signed payload").unwrap();

        assert!(rsa_verify(&public, b"signed payload", &signature));
        assert!(!rsa_verify(&public, b"tampered payload", &signature));
    }

    #[test]
    fn test_rsa_der_roundtrip() {
        let mut rng = StdRng::seed_from_u64(4);
        let private = rsa_generate(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        let der = rsa_public_der(&public).unwrap();
        assert_eq!(rsa_public_from_der(&der).unwrap(), public);

        let private_der = rsa_private_der(&private).unwrap();
        assert_eq!(rsa_private_from_der(&private_der).unwrap(), private);
    }

    #[test]
    fn test_ecdh_agreement() {
        let mut rng = StdRng::seed_from_u64(5);
        let ours = ec_generate(&mut rng);
        let theirs = ec_generate(&mut rng);

        let their_public = ec_public_from_bytes(&theirs.public_bytes()).unwrap();
        let our_public = ec_public_from_bytes(&ours.public_bytes()).unwrap();

        assert_eq!(ours.agree(&their_public), theirs.agree(&our_public));
    }

    #[test]
    fn test_ec_point_encoding() {
        let mut rng = StdRng::seed_from_u64(6);
        let pair = ec_generate(&mut rng);

        let bytes = pair.public_bytes();
        assert_eq!(bytes.len(), EC_POINT_SIZE);
        // Uncompressed points start with the 0x04 marker.
        assert_eq!(bytes[0], 0x04);

        let decoded = ec_public_from_bytes(&bytes).unwrap();
        assert_eq!(ec_public_bytes(&decoded), bytes);
    }

    #[test]
    fn test_ec_point_rejects_garbage() {
        assert_eq!(ec_public_from_bytes(b"not a point"), Err(CryptoError::EcPoint));
        assert_eq!(
            ec_public_from_bytes(&[0u8; EC_POINT_SIZE]),
            Err(CryptoError::EcPoint)
        );
    }
}
