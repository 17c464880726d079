//! Key generation, public key derivation and raw signing per algorithm.

use rand_core::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, pkcs1v15, pss};
use sha2::{Sha256, Sha384, Sha512};
use signature::{RandomizedSigner, SignatureEncoding, Signer};

use super::jwk::{decode, encode};
use super::{PrivateJwk, PublicJwk, SigningAlgorithm};
use crate::{Error, Result};

const RSA_MODULUS_BITS: usize = 2048;

fn crypto_err(e: impl std::fmt::Display) -> Error {
    Error::Crypto(e.to_string())
}

/// Affine coordinates of the public point for the scalar `$d`.
macro_rules! ec_coordinates {
    ($curve:ident, $d:expr) => {{
        use $curve::elliptic_curve::sec1::ToEncodedPoint;
        let secret = $curve::SecretKey::from_slice($d).map_err(crypto_err)?;
        let point = secret.public_key().to_encoded_point(false);
        match (point.x(), point.y()) {
            (Some(x), Some(y)) => (x.to_vec(), y.to_vec()),
            _ => return Err(Error::Crypto("public key is the identity point".to_string())),
        }
    }};
}

/// Fixed-width `r || s` ECDSA signature over `$message`.
macro_rules! ecdsa_sign {
    ($curve:ident, $d:expr, $message:expr) => {{
        let secret = $curve::SecretKey::from_slice($d).map_err(crypto_err)?;
        let key = $curve::ecdsa::SigningKey::from_bytes(&secret.to_bytes()).map_err(crypto_err)?;
        let signature: $curve::ecdsa::Signature = key.try_sign($message).map_err(crypto_err)?;
        signature.to_bytes().to_vec()
    }};
}

/// Generate a fresh private key for `alg`, with its thumbprint as `kid`.
///
/// RSA generation is CPU bound; async callers run this on the blocking pool.
pub fn generate(alg: SigningAlgorithm) -> Result<PrivateJwk> {
    let mut jwk = PrivateJwk::skeleton(alg);

    match alg {
        SigningAlgorithm::Es256 => {
            jwk.d = Some(encode(&p256::SecretKey::random(&mut OsRng).to_bytes()));
        }
        SigningAlgorithm::Es384 => {
            jwk.d = Some(encode(&p384::SecretKey::random(&mut OsRng).to_bytes()));
        }
        SigningAlgorithm::Es512 => {
            jwk.d = Some(encode(&p521::SecretKey::random(&mut OsRng).to_bytes()));
        }
        SigningAlgorithm::Es256k => {
            jwk.d = Some(encode(&k256::SecretKey::random(&mut OsRng).to_bytes()));
        }
        SigningAlgorithm::EdDsa => {
            let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
            jwk.d = Some(encode(&key.to_bytes()));
        }
        SigningAlgorithm::Rs256
        | SigningAlgorithm::Rs384
        | SigningAlgorithm::Rs512
        | SigningAlgorithm::Ps256
        | SigningAlgorithm::Ps384
        | SigningAlgorithm::Ps512 => {
            let key = RsaPrivateKey::new(&mut OsRng, RSA_MODULUS_BITS).map_err(crypto_err)?;
            let [p, q] = key.primes() else {
                return Err(Error::Crypto("generated RSA key is not two-prime".to_string()));
            };
            jwk.n = Some(encode(&key.n().to_bytes_be()));
            jwk.e = Some(encode(&key.e().to_bytes_be()));
            jwk.d = Some(encode(&key.d().to_bytes_be()));
            jwk.p = Some(encode(&p.to_bytes_be()));
            jwk.q = Some(encode(&q.to_bytes_be()));
        }
    }

    let public = public_key(&jwk)?;
    complete_public_members(&mut jwk, &public);
    jwk.kid = Some(public.kid);
    Ok(jwk)
}

/// Public half of `private`, derived from the private members.
///
/// Stored public coordinates are not trusted; they are recomputed so a key
/// set with mismatched members still publishes the key that actually signs.
pub fn public_key(private: &PrivateJwk) -> Result<PublicJwk> {
    let mut derived = private.clone();
    match private.alg {
        SigningAlgorithm::Es256 | SigningAlgorithm::Es384 | SigningAlgorithm::Es512 | SigningAlgorithm::Es256k => {
            let d = private.member("d", private.d.as_ref())?;
            let (x, y) = match private.alg {
                SigningAlgorithm::Es256 => ec_coordinates!(p256, &d),
                SigningAlgorithm::Es384 => ec_coordinates!(p384, &d),
                SigningAlgorithm::Es512 => ec_coordinates!(p521, &d),
                _ => ec_coordinates!(k256, &d),
            };
            derived.x = Some(encode(&x));
            derived.y = Some(encode(&y));
        }
        SigningAlgorithm::EdDsa => {
            let key = ed25519_key(private)?;
            derived.x = Some(encode(key.verifying_key().as_bytes()));
        }
        _ => {
            // n and e are the public key; require them up front
            private.member("n", private.n.as_ref())?;
            private.member("e", private.e.as_ref())?;
        }
    }
    PublicJwk::from_parts(&derived)
}

/// Sign `message` with `private`.
///
/// Returns [`Error::UnsupportedAlgorithm`] for algorithms without an HTTP
/// message signature mapping.
pub fn sign(private: &PrivateJwk, message: &[u8]) -> Result<Vec<u8>> {
    if !private.alg.can_sign_requests() {
        return Err(Error::UnsupportedAlgorithm(private.alg.to_string()));
    }

    Ok(match private.alg {
        SigningAlgorithm::Es256 => {
            let d = private.member("d", private.d.as_ref())?;
            ecdsa_sign!(p256, &d, message)
        }
        SigningAlgorithm::Es384 => {
            let d = private.member("d", private.d.as_ref())?;
            ecdsa_sign!(p384, &d, message)
        }
        SigningAlgorithm::Es512 => {
            let d = private.member("d", private.d.as_ref())?;
            ecdsa_sign!(p521, &d, message)
        }
        SigningAlgorithm::Rs256 => pkcs1v15::SigningKey::<Sha256>::new(rsa_key(private)?)
            .try_sign(message)
            .map_err(crypto_err)?
            .to_vec(),
        SigningAlgorithm::Rs384 => pkcs1v15::SigningKey::<Sha384>::new(rsa_key(private)?)
            .try_sign(message)
            .map_err(crypto_err)?
            .to_vec(),
        SigningAlgorithm::Rs512 => pkcs1v15::SigningKey::<Sha512>::new(rsa_key(private)?)
            .try_sign(message)
            .map_err(crypto_err)?
            .to_vec(),
        SigningAlgorithm::Ps256 => pss::BlindedSigningKey::<Sha256>::new(rsa_key(private)?)
            .try_sign_with_rng(&mut OsRng, message)
            .map_err(crypto_err)?
            .to_vec(),
        SigningAlgorithm::Ps384 => pss::BlindedSigningKey::<Sha384>::new(rsa_key(private)?)
            .try_sign_with_rng(&mut OsRng, message)
            .map_err(crypto_err)?
            .to_vec(),
        SigningAlgorithm::Ps512 => pss::BlindedSigningKey::<Sha512>::new(rsa_key(private)?)
            .try_sign_with_rng(&mut OsRng, message)
            .map_err(crypto_err)?
            .to_vec(),
        SigningAlgorithm::Es256k | SigningAlgorithm::EdDsa => {
            return Err(Error::UnsupportedAlgorithm(private.alg.to_string()));
        }
    })
}

fn complete_public_members(private: &mut PrivateJwk, public: &PublicJwk) {
    private.x.clone_from(&public.x);
    private.y.clone_from(&public.y);
}

fn ed25519_key(private: &PrivateJwk) -> Result<ed25519_dalek::SigningKey> {
    let d = private.member("d", private.d.as_ref())?;
    let bytes: [u8; 32] = d
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto(format!("Ed25519 seed must be 32 bytes, got {}", d.len())))?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&bytes))
}

fn rsa_key(private: &PrivateJwk) -> Result<RsaPrivateKey> {
    let component = |name: &'static str, value: Option<&String>| -> Result<BigUint> {
        private
            .member(name, value)
            .map(|bytes| BigUint::from_bytes_be(&bytes))
    };

    let n = component("n", private.n.as_ref())?;
    let e = component("e", private.e.as_ref())?;
    let d = component("d", private.d.as_ref())?;
    let primes = match (private.p.as_deref(), private.q.as_deref()) {
        (Some(p), Some(q)) => vec![
            BigUint::from_bytes_be(&decode(p).map_err(crypto_err)?),
            BigUint::from_bytes_be(&decode(q).map_err(crypto_err)?),
        ],
        // Recovered from n, e and d
        _ => Vec::new(),
    };

    RsaPrivateKey::from_components(n, e, d, primes).map_err(crypto_err)
}
