//! Signed outbound requests
//!
//! [`RequestSigner`] attaches the server's credential and an RFC 9421
//! signature to each request and delegates transport to an [`HttpFetch`].

mod fetch;
mod signer;

pub use fetch::{FetchResponse, HttpFetch, OutboundRequest, ReqwestFetch};
pub use signer::{
    RequestSigner, SIGNATURE_LABEL, SignatureParams, content_digest, parse_signature,
    parse_signature_input, signature_base,
};
