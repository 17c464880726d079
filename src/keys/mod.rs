//! Signing key material
//!
//! The resource server identifies itself to the authorization server with a
//! single asymmetric key pair. The private key lives in a
//! [`KeyValueStore`](crate::store::KeyValueStore) and is created on first
//! use; the public key is published as a JWKS so the authorization server
//! can verify request signatures.

mod algorithm;
mod jwk;
mod manager;
pub mod material;

pub use algorithm::SigningAlgorithm;
pub use jwk::{JwkSet, PrivateJwk, PublicJwk};
pub use manager::KeyMaterialManager;
