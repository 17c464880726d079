//! UMA protocol plumbing: metadata discovery, tickets, introspection and
//! resource registration.

mod client;
mod metadata;

pub use client::{Introspection, UmaClient};
pub use metadata::{AuthServerMetadata, Endpoint, UmaConfiguration};

/// Scope requested in permission tickets for reads.
pub const READ_SCOPE: &str = "urn:example:css:modes:read";

/// Scopes a resource is registered with.
pub const REGISTRATION_SCOPES: [&str; 5] = [
    READ_SCOPE,
    "urn:example:css:modes:append",
    "urn:example:css:modes:create",
    "urn:example:css:modes:delete",
    "urn:example:css:modes:write",
];

/// `WWW-Authenticate` value pointing the client at the authorization server.
#[must_use]
pub fn challenge(realm: &str, as_uri: &str, ticket: &str) -> String {
    format!("UMA realm=\"{realm}\",as_uri=\"{as_uri}\",ticket=\"{ticket}\"")
}
