//! JOSE algorithm identifiers for the server's signing key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Algorithm of the asymmetric key pair, as carried in the JWK `alg` member.
///
/// Every variant can be generated and published. Only those with an
/// [`http_signature_alg`](Self::http_signature_alg) can sign requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// ECDSA P-256 / SHA-256
    #[serde(rename = "ES256")]
    Es256,
    /// ECDSA P-384 / SHA-384
    #[serde(rename = "ES384")]
    Es384,
    /// ECDSA P-521 / SHA-512
    #[serde(rename = "ES512")]
    Es512,
    /// ECDSA secp256k1 / SHA-256
    #[serde(rename = "ES256K")]
    Es256k,
    /// RSASSA-PKCS1-v1_5 / SHA-256
    #[serde(rename = "RS256")]
    Rs256,
    /// RSASSA-PKCS1-v1_5 / SHA-384
    #[serde(rename = "RS384")]
    Rs384,
    /// RSASSA-PKCS1-v1_5 / SHA-512
    #[serde(rename = "RS512")]
    Rs512,
    /// RSASSA-PSS / SHA-256
    #[serde(rename = "PS256")]
    Ps256,
    /// RSASSA-PSS / SHA-384
    #[serde(rename = "PS384")]
    Ps384,
    /// RSASSA-PSS / SHA-512
    #[serde(rename = "PS512")]
    Ps512,
    /// Ed25519
    #[serde(rename = "EdDSA")]
    EdDsa,
}

impl SigningAlgorithm {
    /// All known algorithms.
    pub const ALL: [Self; 11] = [
        Self::Es256,
        Self::Es384,
        Self::Es512,
        Self::Es256k,
        Self::Rs256,
        Self::Rs384,
        Self::Rs512,
        Self::Ps256,
        Self::Ps384,
        Self::Ps512,
        Self::EdDsa,
    ];

    /// JOSE name (`ES256`, `PS512`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::Es256k => "ES256K",
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
            Self::EdDsa => "EdDSA",
        }
    }

    /// JWK key type (`kty`).
    #[must_use]
    pub const fn key_type(self) -> &'static str {
        match self {
            Self::Es256 | Self::Es384 | Self::Es512 | Self::Es256k => "EC",
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512 => {
                "RSA"
            }
            Self::EdDsa => "OKP",
        }
    }

    /// JWK curve name (`crv`) for EC and OKP keys.
    #[must_use]
    pub const fn curve(self) -> Option<&'static str> {
        match self {
            Self::Es256 => Some("P-256"),
            Self::Es384 => Some("P-384"),
            Self::Es512 => Some("P-521"),
            Self::Es256k => Some("secp256k1"),
            Self::EdDsa => Some("Ed25519"),
            _ => None,
        }
    }

    /// RFC 9421 `alg` parameter used when this key signs a request.
    ///
    /// `None` means there is no signing primitive for the algorithm.
    #[must_use]
    pub const fn http_signature_alg(self) -> Option<&'static str> {
        match self {
            Self::Es256 => Some("ecdsa-p256-sha256"),
            Self::Es384 => Some("ecdsa-p384-sha384"),
            Self::Es512 => Some("ecdsa-p521-sha512"),
            Self::Rs256 => Some("rsa-v1_5-sha256"),
            Self::Rs384 => Some("rsa-v1_5-sha384"),
            Self::Rs512 => Some("rsa-v1_5-sha512"),
            Self::Ps256 => Some("rsa-pss-sha256"),
            Self::Ps384 => Some("rsa-pss-sha384"),
            Self::Ps512 => Some("rsa-pss-sha512"),
            Self::Es256k | Self::EdDsa => None,
        }
    }

    /// Whether requests can be signed with a key of this algorithm.
    #[must_use]
    pub const fn can_sign_requests(self) -> bool {
        self.http_signature_alg().is_some()
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))
    }
}
