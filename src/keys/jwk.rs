//! JSON Web Key representations of the signing key.
//!
//! The private key is the only thing ever persisted. Its public half is
//! derived on demand and published through [`JwkSet`] at
//! `/.well-known/jwks.json`.
//!
//! The `kid` is the RFC 7638 thumbprint of the public key, so the same
//! private key always yields the same `kid`, and the `keyid` in every
//! request signature matches the published JWK.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::SigningAlgorithm;
use crate::{Error, Result};

/// Private key in JWK form, as stored in the key-value store.
///
/// Only the members relevant for the key type are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateJwk {
    /// Key type
    pub kty: String,
    /// Curve (EC / OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// X coordinate (EC) or public key (OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Y coordinate (EC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Private scalar (EC / OKP) or private exponent (RSA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// Modulus (RSA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Public exponent (RSA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// First prime factor (RSA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// Second prime factor (RSA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// Algorithm the key was generated for
    pub alg: SigningAlgorithm,
    /// Key identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl PrivateJwk {
    /// Empty JWK for `alg`; callers fill in the key members.
    #[must_use]
    pub fn skeleton(alg: SigningAlgorithm) -> Self {
        Self {
            kty: alg.key_type().to_string(),
            crv: alg.curve().map(str::to_string),
            x: None,
            y: None,
            d: None,
            n: None,
            e: None,
            p: None,
            q: None,
            alg,
            kid: None,
        }
    }

    /// Key identifier. Keys handed out by the key manager always carry one.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.kid.as_deref().unwrap_or_default()
    }

    /// Decode a base64url member, failing if it is absent.
    pub(crate) fn member(&self, name: &'static str, value: Option<&String>) -> Result<Vec<u8>> {
        let encoded = value.ok_or_else(|| {
            Error::Crypto(format!("{} key is missing the '{name}' member", self.alg))
        })?;
        decode(encoded).map_err(|e| Error::Crypto(format!("invalid '{name}' member: {e}")))
    }
}

/// Public key in JWK form, as published in the JWKS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    /// Key type
    pub kty: String,
    /// Curve (EC / OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// X coordinate (EC) or public key (OKP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Y coordinate (EC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Modulus (RSA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Public exponent (RSA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Algorithm
    pub alg: SigningAlgorithm,
    /// Key identifier (RFC 7638 thumbprint)
    pub kid: String,
    /// Public key use, always `sig`
    #[serde(rename = "use")]
    pub key_use: String,
}

impl PublicJwk {
    /// Public half of a private JWK. The `kid` is recomputed from the public
    /// members rather than trusted from the input.
    ///
    /// # Errors
    ///
    /// Returns an error if the members required for the key type are missing.
    pub fn from_parts(private: &PrivateJwk) -> Result<Self> {
        let mut public = Self {
            kty: private.kty.clone(),
            crv: private.crv.clone(),
            x: private.x.clone(),
            y: private.y.clone(),
            n: private.n.clone(),
            e: private.e.clone(),
            alg: private.alg,
            kid: String::new(),
            key_use: "sig".to_string(),
        };
        public.kid = public.thumbprint()?;
        Ok(public)
    }

    /// RFC 7638 JWK thumbprint (SHA-256, base64url).
    ///
    /// # Errors
    ///
    /// Returns an error if a required member for the key type is missing.
    pub fn thumbprint(&self) -> Result<String> {
        let missing = |name: &str| Error::Crypto(format!("cannot compute thumbprint: missing '{name}'"));

        // Required members in lexicographic order
        let canonical = match self.kty.as_str() {
            "EC" => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                self.crv.as_deref().ok_or_else(|| missing("crv"))?,
                self.x.as_deref().ok_or_else(|| missing("x"))?,
                self.y.as_deref().ok_or_else(|| missing("y"))?,
            ),
            "RSA" => format!(
                r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
                self.e.as_deref().ok_or_else(|| missing("e"))?,
                self.n.as_deref().ok_or_else(|| missing("n"))?,
            ),
            "OKP" => format!(
                r#"{{"crv":"{}","kty":"OKP","x":"{}"}}"#,
                self.crv.as_deref().ok_or_else(|| missing("crv"))?,
                self.x.as_deref().ok_or_else(|| missing("x"))?,
            ),
            other => {
                return Err(Error::Crypto(format!("unknown key type '{other}'")));
            }
        };

        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
    }
}

/// JSON Web Key Set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Published keys
    pub keys: Vec<PublicJwk>,
}

impl JwkSet {
    /// Key set holding a single key.
    #[must_use]
    pub fn single(key: PublicJwk) -> Self {
        Self { keys: vec![key] }
    }

    /// Look up a key by `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&PublicJwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// Shapes the private key has been persisted in.
///
/// Older deployments stored a key set whose only element was the private
/// key; both that and a bare array are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredKey {
    Single(PrivateJwk),
    Set { keys: Vec<PrivateJwk> },
    List(Vec<PrivateJwk>),
}

impl StoredKey {
    pub(crate) fn into_private(self) -> Option<PrivateJwk> {
        match self {
            Self::Single(jwk) => Some(jwk),
            Self::Set { keys } | Self::List(keys) => keys.into_iter().next(),
        }
    }
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn decode(value: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value)
}
