//! RFC 9421 HTTP Message Signatures for requests to the authorization server.

use std::sync::Arc;
use std::time::SystemTime;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{FetchResponse, HttpFetch, OutboundRequest};
use crate::keys::{KeyMaterialManager, material};
use crate::{Error, Result};

/// Label used for the single signature on each request.
pub const SIGNATURE_LABEL: &str = "sig1";

const SIGNATURE: HeaderName = HeaderName::from_static("signature");
const SIGNATURE_INPUT: HeaderName = HeaderName::from_static("signature-input");
const CONTENT_DIGEST: HeaderName = HeaderName::from_static("content-digest");

/// Parameters of one signature, as carried in `Signature-Input`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    /// Covered components in signing order
    pub components: Vec<String>,
    /// Creation time, seconds since the epoch
    pub created: u64,
    /// Key identifier (JWK `kid`)
    pub keyid: String,
    /// RFC 9421 algorithm name
    pub alg: String,
    /// Random nonce
    pub nonce: Option<String>,
}

impl SignatureParams {
    /// Serialized inner list with parameters, e.g.
    /// `("@method" "@target-uri");created=1;keyid="k";alg="ecdsa-p256-sha256"`.
    #[must_use]
    pub fn serialize(&self) -> String {
        let components = self
            .components
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(" ");
        let mut value = format!(
            "({components});created={};keyid=\"{}\";alg=\"{}\"",
            self.created, self.keyid, self.alg
        );
        if let Some(nonce) = &self.nonce {
            value.push_str(&format!(";nonce=\"{nonce}\""));
        }
        value
    }
}

/// Signs outbound requests with the server's key and sends them through the
/// injected [`HttpFetch`].
///
/// Every request carries `Authorization: HttpSig cred="<base url>"`, plus
/// `Signature-Input` and `Signature` headers covering the method, target URI
/// and all request headers. Requests with a body also get a
/// `Content-Digest` header, which is covered too.
pub struct RequestSigner {
    keys: Arc<KeyMaterialManager>,
    fetch: Arc<dyn HttpFetch>,
    identity: String,
}

impl RequestSigner {
    /// Signer identifying as `identity` (the server's public base URL).
    pub fn new(
        keys: Arc<KeyMaterialManager>,
        fetch: Arc<dyn HttpFetch>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            fetch,
            identity: identity.into(),
        }
    }

    /// Value of the `Authorization` header sent with every request.
    #[must_use]
    pub fn credential(&self) -> String {
        format!("HttpSig cred=\"{}\"", self.identity)
    }

    /// Sign `request` and send it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlgorithm`] without sending anything when
    /// the key cannot sign requests; otherwise the fetch outcome.
    pub async fn signed_fetch(&self, mut request: OutboundRequest) -> Result<FetchResponse> {
        self.sign(&mut request).await?;
        self.fetch.fetch(request).await
    }

    /// Add the credential and signature headers to `request`.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn sign(&self, request: &mut OutboundRequest) -> Result<()> {
        let key = self.keys.private_key().await?;
        let alg = key
            .alg
            .http_signature_alg()
            .ok_or_else(|| Error::UnsupportedAlgorithm(key.alg.to_string()))?;

        request
            .headers
            .insert(AUTHORIZATION, header_value(&self.credential())?);
        if let Some(body) = request.body.as_ref().filter(|b| !b.is_empty()) {
            request
                .headers
                .insert(CONTENT_DIGEST, header_value(&content_digest(body))?);
        }

        let params = SignatureParams {
            components: covered_components(&request.headers),
            created: unix_now()?,
            keyid: key.kid().to_string(),
            alg: alg.to_string(),
            nonce: Some(Uuid::new_v4().to_string()),
        };
        let base = signature_base(request, &params)?;
        let signature = material::sign(&key, base.as_bytes())?;

        request.headers.insert(
            SIGNATURE_INPUT,
            header_value(&format!("{SIGNATURE_LABEL}={}", params.serialize()))?,
        );
        request.headers.insert(
            SIGNATURE,
            header_value(&format!("{SIGNATURE_LABEL}=:{}:", STANDARD.encode(signature)))?,
        );

        debug!(keyid = %params.keyid, alg, components = params.components.len(), "Signed request");
        Ok(())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("identity", &self.identity)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// `sha-256=:<base64>:` per RFC 9530.
#[must_use]
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", STANDARD.encode(Sha256::digest(body)))
}

/// `@method`, `@target-uri`, then every header name in sorted order.
fn covered_components(headers: &HeaderMap) -> Vec<String> {
    let mut names: Vec<&str> = headers
        .keys()
        .map(HeaderName::as_str)
        .filter(|name| *name != SIGNATURE.as_str() && *name != SIGNATURE_INPUT.as_str())
        .collect();
    names.sort_unstable();
    names.dedup();

    ["@method", "@target-uri"]
        .into_iter()
        .chain(names)
        .map(str::to_string)
        .collect()
}

/// Build the RFC 9421 signature base for `request`.
///
/// # Errors
///
/// Returns an error if a covered header is absent or not visible ASCII, or
/// a derived component is not supported.
pub fn signature_base(request: &OutboundRequest, params: &SignatureParams) -> Result<String> {
    let mut lines = Vec::with_capacity(params.components.len() + 1);
    for component in &params.components {
        let value = match component.as_str() {
            "@method" => request.method.as_str().to_string(),
            "@target-uri" => request.url.to_string(),
            "@authority" => authority(&request.url),
            "@scheme" => request.url.scheme().to_string(),
            "@path" => request.url.path().to_string(),
            "@query" => format!("?{}", request.url.query().unwrap_or_default()),
            derived if derived.starts_with('@') => {
                return Err(Error::Crypto(format!(
                    "Unsupported derived component {derived}"
                )));
            }
            name => field_value(&request.headers, name)?,
        };
        lines.push(format!("\"{component}\": {value}"));
    }
    lines.push(format!("\"@signature-params\": {}", params.serialize()));
    Ok(lines.join("\n"))
}

/// Parse a `Signature-Input` header into its label and parameters.
///
/// Only the first signature in the dictionary is considered.
///
/// # Errors
///
/// Returns an error if the value is not `label=(...);params` or lacks
/// `created`, `keyid` or `alg`.
pub fn parse_signature_input(header_value: &str) -> Result<(String, SignatureParams)> {
    let invalid = |why: &str| Error::Crypto(format!("Invalid Signature-Input: {why}"));

    let (label, rest) = header_value
        .split_once('=')
        .ok_or_else(|| invalid("missing label"))?;
    let rest = rest
        .strip_prefix('(')
        .ok_or_else(|| invalid("missing component list"))?;
    let (inner, params) = rest
        .split_once(')')
        .ok_or_else(|| invalid("unterminated component list"))?;

    let components = inner
        .split_whitespace()
        .map(|c| unquote(c).ok_or_else(|| invalid("component is not a string")))
        .collect::<Result<Vec<_>>>()?;

    let mut created = None;
    let mut keyid = None;
    let mut alg = None;
    let mut nonce = None;
    for param in params.split(';').filter(|p| !p.is_empty()) {
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| invalid("parameter without value"))?;
        match name.trim() {
            "created" => {
                created = Some(value.parse::<u64>().map_err(|_| invalid("bad created"))?);
            }
            "keyid" => keyid = unquote(value),
            "alg" => alg = unquote(value),
            "nonce" => nonce = unquote(value),
            _ => {}
        }
    }

    Ok((
        label.trim().to_string(),
        SignatureParams {
            components,
            created: created.ok_or_else(|| invalid("missing created"))?,
            keyid: keyid.ok_or_else(|| invalid("missing keyid"))?,
            alg: alg.ok_or_else(|| invalid("missing alg"))?,
            nonce,
        },
    ))
}

/// Parse a `Signature` header (`label=:base64:`) into label and bytes.
pub fn parse_signature(header_value: &str) -> Result<(String, Vec<u8>)> {
    let invalid = |why: &str| Error::Crypto(format!("Invalid Signature: {why}"));

    let (label, value) = header_value
        .split_once('=')
        .ok_or_else(|| invalid("missing label"))?;
    let encoded = value
        .strip_prefix(':')
        .and_then(|v| v.strip_suffix(':'))
        .ok_or_else(|| invalid("not a byte sequence"))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| invalid(&e.to_string()))?;
    Ok((label.trim().to_string(), bytes))
}

fn unquote(value: &str) -> Option<String> {
    value
        .trim()
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(str::to_string)
}

fn authority(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}

fn field_value(headers: &HeaderMap, name: &str) -> Result<String> {
    let values = headers
        .get_all(name)
        .iter()
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| Error::Crypto(format!("Header {name} is not visible ASCII")))
        })
        .collect::<Result<Vec<_>>>()?;
    if values.is_empty() {
        return Err(Error::Crypto(format!("Covered header {name} is missing")));
    }
    Ok(values.join(", "))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::Internal(format!("Invalid header value: {e}")))
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| Error::Crypto(format!("system time error: {e}")))?
        .as_secs())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use reqwest::{StatusCode, Url};
    use signature::Verifier;

    use super::*;
    use crate::keys::SigningAlgorithm;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct RecordingFetch {
        requests: Mutex<Vec<OutboundRequest>>,
    }

    #[async_trait::async_trait]
    impl HttpFetch for RecordingFetch {
        async fn fetch(&self, request: OutboundRequest) -> Result<FetchResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(FetchResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: bytes::Bytes::new(),
            })
        }
    }

    fn signer(alg: SigningAlgorithm) -> (RequestSigner, Arc<KeyMaterialManager>, Arc<RecordingFetch>) {
        let keys = Arc::new(KeyMaterialManager::new(
            Arc::new(MemoryStore::new()),
            "signing-key",
            alg,
        ));
        let fetch = Arc::new(RecordingFetch::default());
        let signer = RequestSigner::new(
            Arc::clone(&keys),
            Arc::clone(&fetch) as Arc<dyn HttpFetch>,
            "http://rs.example",
        );
        (signer, keys, fetch)
    }

    fn header<'a>(request: &'a OutboundRequest, name: &str) -> &'a str {
        request.headers.get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn signed_request_verifies_with_published_key() {
        // GIVEN: an ES256 signer
        let (signer, keys, fetch) = signer(SigningAlgorithm::Es256);
        let url = Url::parse("https://as.example/uma/ticket").unwrap();
        let request = OutboundRequest::post(url)
            .json(&serde_json::json!([{ "resource_id": "r" }]))
            .unwrap();

        // WHEN: the request is sent
        signer.signed_fetch(request).await.unwrap();

        // THEN: the recorded request carries a verifiable signature
        let sent = fetch.requests.lock().unwrap().pop().unwrap();
        assert_eq!(header(&sent, "authorization"), "HttpSig cred=\"http://rs.example\"");

        let (label, params) = parse_signature_input(header(&sent, "signature-input")).unwrap();
        assert_eq!(label, SIGNATURE_LABEL);
        assert_eq!(params.alg, "ecdsa-p256-sha256");
        assert_eq!(
            params.components,
            vec!["@method", "@target-uri", "authorization", "content-digest", "content-type"]
        );

        let jwks = keys.jwks().await.unwrap();
        let public = jwks.find(&params.keyid).expect("keyid is published");

        let (_, sig) = parse_signature(header(&sent, "signature")).unwrap();
        let base = signature_base(&sent, &params).unwrap();
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let x = engine.decode(public.x.as_deref().unwrap()).unwrap();
        let y = engine.decode(public.y.as_deref().unwrap()).unwrap();
        let point = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&x),
            p256::FieldBytes::from_slice(&y),
            false,
        );
        let verifier = p256::ecdsa::VerifyingKey::from_encoded_point(&point).unwrap();
        let sig = p256::ecdsa::Signature::from_slice(&sig).unwrap();
        assert!(verifier.verify(base.as_bytes(), &sig).is_ok());
    }

    #[tokio::test]
    async fn content_digest_covers_body() {
        let (signer, _, fetch) = signer(SigningAlgorithm::Es256);
        let url = Url::parse("https://as.example/introspect").unwrap();
        let request = OutboundRequest::post(url).form(&[("token", "t")]).unwrap();

        signer.signed_fetch(request).await.unwrap();

        let sent = fetch.requests.lock().unwrap().pop().unwrap();
        assert_eq!(header(&sent, "content-digest"), content_digest(b"token=t"));
    }

    #[tokio::test]
    async fn bodyless_request_has_no_digest() {
        let (signer, _, fetch) = signer(SigningAlgorithm::Es384);
        let url = Url::parse("https://as.example/resource").unwrap();

        signer.signed_fetch(OutboundRequest::get(url)).await.unwrap();

        let sent = fetch.requests.lock().unwrap().pop().unwrap();
        assert!(sent.headers.get("content-digest").is_none());
        let (_, params) = parse_signature_input(header(&sent, "signature-input")).unwrap();
        assert_eq!(params.alg, "ecdsa-p384-sha384");
        assert_eq!(params.components, vec!["@method", "@target-uri", "authorization"]);
    }

    #[tokio::test]
    async fn eddsa_key_fails_before_sending() {
        let (signer, _, fetch) = signer(SigningAlgorithm::EdDsa);
        let url = Url::parse("https://as.example/ticket").unwrap();

        let err = signer.signed_fetch(OutboundRequest::post(url)).await.unwrap_err();

        assert!(matches!(err, Error::UnsupportedAlgorithm(alg) if alg == "EdDSA"));
        assert!(fetch.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_signature_gets_a_fresh_nonce() {
        let (signer, _, fetch) = signer(SigningAlgorithm::Es256);
        let url = Url::parse("https://as.example/ticket").unwrap();
        signer.signed_fetch(OutboundRequest::get(url.clone())).await.unwrap();
        signer.signed_fetch(OutboundRequest::get(url)).await.unwrap();

        let sent = fetch.requests.lock().unwrap();
        let nonces: Vec<_> = sent
            .iter()
            .map(|r| parse_signature_input(header(r, "signature-input")).unwrap().1.nonce)
            .collect();
        assert_ne!(nonces[0], nonces[1]);
    }

    #[test]
    fn signature_base_layout() {
        let url = Url::parse("https://as.example:8443/uma/ticket?x=1").unwrap();
        let request = OutboundRequest::post(url).header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        );
        let params = SignatureParams {
            components: vec![
                "@method".into(),
                "@target-uri".into(),
                "@authority".into(),
                "@path".into(),
                "content-type".into(),
            ],
            created: 1_700_000_000,
            keyid: "kid-1".into(),
            alg: "ecdsa-p256-sha256".into(),
            nonce: Some("n-1".into()),
        };

        let base = signature_base(&request, &params).unwrap();
        let expected = "\"@method\": POST\n\
\"@target-uri\": https://as.example:8443/uma/ticket?x=1\n\
\"@authority\": as.example:8443\n\
\"@path\": /uma/ticket\n\
\"content-type\": application/json\n\
\"@signature-params\": (\"@method\" \"@target-uri\" \"@authority\" \"@path\" \"content-type\");created=1700000000;keyid=\"kid-1\";alg=\"ecdsa-p256-sha256\";nonce=\"n-1\"";
        assert_eq!(base, expected);
    }

    #[test]
    fn missing_covered_header_is_an_error() {
        let url = Url::parse("https://as.example/").unwrap();
        let params = SignatureParams {
            components: vec!["authorization".into()],
            created: 0,
            keyid: "k".into(),
            alg: "a".into(),
            nonce: None,
        };
        assert!(signature_base(&OutboundRequest::get(url), &params).is_err());
    }

    #[test]
    fn signature_input_round_trips_through_parser() {
        let params = SignatureParams {
            components: vec!["@method".into(), "authorization".into()],
            created: 42,
            keyid: "abc".into(),
            alg: "rsa-pss-sha512".into(),
            nonce: None,
        };
        let header = format!("sig1={}", params.serialize());
        assert_eq!(
            parse_signature_input(&header).unwrap(),
            ("sig1".to_string(), params)
        );
    }

    #[test]
    fn malformed_signature_input_is_rejected() {
        assert!(parse_signature_input("sig1").is_err());
        assert!(parse_signature_input("sig1=\"@method\"").is_err());
        assert!(parse_signature_input("sig1=(\"@method\");keyid=\"k\";alg=\"a\"").is_err());
        assert!(parse_signature_input("sig1=(\"@method\");created=x;keyid=\"k\";alg=\"a\"").is_err());
    }

    #[test]
    fn signature_header_requires_byte_sequence() {
        assert!(parse_signature("sig1=AAAA").is_err());
        let (label, bytes) = parse_signature("sig1=:AAEC:").unwrap();
        assert_eq!(label, "sig1");
        assert_eq!(bytes, vec![0, 1, 2]);
    }
}
