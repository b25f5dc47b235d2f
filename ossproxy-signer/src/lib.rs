#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! AWS SigV4 request signing for the single GET-only upstream request the
//! proxy issues per client request.
//!
//! The payload hash is always the SHA-256 of the empty string — the proxy
//! never sends a body upstream, and a non-empty body would invalidate the
//! signature computed here.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty string, hex-encoded. Used as `x-amz-content-sha256`
/// for every signed request since the proxy only issues GETs with no body.
pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// The inputs to one SigV4 signature.
pub struct SignInput<'a> {
    pub credentials: &'a Credentials,
    pub region: &'a str,
    /// `host` header value the request will be sent with, e.g.
    /// `bucket.s3.amazonaws.com` or `s3.amazonaws.com`.
    pub host: &'a str,
    /// Absolute request path, not including the query string.
    pub path: &'a str,
    /// Raw query string (no leading `?`), may be empty.
    pub query: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// The headers a signed request must carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedHeaders {
    pub x_amz_date: String,
    pub x_amz_content_sha256: String,
    pub authorization: String,
}

const SIGNED_HEADER_NAMES: &str = "host;x-amz-content-sha256;x-amz-date";
const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Computes the SigV4 `Authorization` header (plus its supporting headers)
/// for a GET request with an empty body.
pub fn sign(input: SignInput<'_>) -> SignedHeaders {
    let amz_date = input.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = input.timestamp.format("%Y%m%d").to_string();

    let canonical_query = canonical_query_string(input.query);
    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        input.host, EMPTY_PAYLOAD_HASH, amz_date
    );

    let canonical_request = format!(
        "GET\n{}\n{}\n{}\n{}\n{}",
        input.path, canonical_query, canonical_headers, SIGNED_HEADER_NAMES, EMPTY_PAYLOAD_HASH
    );
    let hashed_canonical_request = hex_sha256(canonical_request.as_bytes());

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, input.region, SERVICE
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM, amz_date, credential_scope, hashed_canonical_request
    );

    let signing_key = derive_signing_key(
        &input.credentials.secret_access_key,
        &date_stamp,
        input.region,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, input.credentials.access_key_id, credential_scope, SIGNED_HEADER_NAMES, signature
    );

    SignedHeaders {
        x_amz_date: amz_date,
        x_amz_content_sha256: EMPTY_PAYLOAD_HASH.to_string(),
        authorization,
    }
}

/// Sorts `k[=v]` query pairs lexicographically by key and re-joins them.
/// Returns the empty string when `query` has no parameters.
fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        })
        .collect();
    pairs.sort_by(|a, b| a.cmp(b));

    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn derive_signing_key(secret_access_key: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_access_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    fn creds() -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
        }
    }

    #[test]
    fn canonical_query_sorts_keys() {
        assert_eq!(canonical_query_string("z=1&a=2"), "a=2&z=1");
        assert_eq!(canonical_query_string(""), "");
    }

    #[test]
    fn signature_is_deterministic_and_query_order_invariant() {
        let creds = creds();
        let a = sign(SignInput {
            credentials: &creds,
            region: "us-east-1",
            host: "examplebucket.s3.amazonaws.com",
            path: "/x",
            query: "z=1&a=2",
            timestamp: fixed_time(),
        });
        let b = sign(SignInput {
            credentials: &creds,
            region: "us-east-1",
            host: "examplebucket.s3.amazonaws.com",
            path: "/x",
            query: "a=2&z=1",
            timestamp: fixed_time(),
        });
        assert_eq!(a.authorization, b.authorization);
    }

    #[test]
    fn different_hosts_produce_different_signatures() {
        let creds = creds();
        let a = sign(SignInput {
            credentials: &creds,
            region: "us-east-1",
            host: "bucket-a.s3.amazonaws.com",
            path: "/x",
            query: "",
            timestamp: fixed_time(),
        });
        let b = sign(SignInput {
            credentials: &creds,
            region: "us-east-1",
            host: "bucket-b.s3.amazonaws.com",
            path: "/x",
            query: "",
            timestamp: fixed_time(),
        });
        assert_ne!(a.authorization, b.authorization);
    }

    #[test]
    fn empty_payload_hash_matches_known_value() {
        assert_eq!(hex_sha256(b""), EMPTY_PAYLOAD_HASH);
    }
}
