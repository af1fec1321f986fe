//! AWS Signature Version 4 request signing.
//!
//! The control-plane API authenticates every request with an
//! HMAC-SHA256 signature over a canonical form of the request:
//! 1. A canonical request is built from method, path, query, sorted headers
//!    and the payload hash
//! 2. The string to sign binds that hash to a timestamp and credential scope
//! 3. The signing key is derived from the secret by chaining HMACs over date,
//!    region, service and the `aws4_request` terminator

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const TERMINATOR: &str = "aws4_request";

/// Signs requests for one service in one region.
pub struct Signer<'a> {
    credentials: &'a Credentials,
    region: &'a str,
    service: &'a str,
}

/// The parts of an HTTP request covered by the signature.
pub struct CanonicalParts<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Already-encoded, sorted query string (empty for none).
    pub query: &'a str,
    /// Headers to sign. Must include `host` and `x-amz-date`.
    pub headers: &'a [(&'a str, &'a str)],
    pub payload: &'a [u8],
}

impl<'a> Signer<'a> {
    pub fn new(credentials: &'a Credentials, region: &'a str, service: &'a str) -> Self {
        Self {
            credentials,
            region,
            service,
        }
    }

    /// Returns the `Authorization` header value for `parts` at `amz_date`
    /// (`YYYYMMDDTHHMMSSZ`).
    pub fn authorization(&self, amz_date: &str, parts: &CanonicalParts<'_>) -> String {
        let date = &amz_date[..amz_date.len().min(8)];
        let scope = format!("{}/{}/{}/{}", date, self.region, self.service, TERMINATOR);

        let (canonical_request, signed_headers) = canonical_request(parts);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = signing_key(
            &self.credentials.secret_access_key,
            date,
            self.region,
            self.service,
        );
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key_id, scope, signed_headers, signature
        )
    }
}

/// Builds the canonical request and the signed header list.
fn canonical_request(parts: &CanonicalParts<'_>) -> (String, String) {
    let mut headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), collapse_whitespace(value)))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        parts.method,
        parts.path,
        parts.query,
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(parts.payload))
    );
    (request, signed_headers)
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derives the per-day, per-region, per-service signing key.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, TERMINATOR.as_bytes())
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
