//! AWS Signature Version 4 for sandbox API calls.
//!
//! Two forms are needed: header signing for REST calls and for the
//! WebSocket upgrade of the automation stream, and query presigning for
//! live-view URLs that are handed to a browser as-is.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt::Write;
use std::path::Path;
use url::Url;

use crate::error::{Result, SandboxError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Signing name of the sandbox service.
pub const SERVICE_NAME: &str = "bedrock-agentcore";

/// Access keys used to sign requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Creates credentials from their parts.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Reads the standard `AWS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| SandboxError::credentials("AWS_ACCESS_KEY_ID is not set"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| SandboxError::credentials("AWS_SECRET_ACCESS_KEY is not set"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Ok(Self::new(access_key_id, secret_access_key, session_token))
    }

    /// Reads a profile from a shared credentials file.
    pub fn from_profile_file(path: &Path, profile: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::credentials(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse_profile(&content, profile).ok_or_else(|| {
            SandboxError::credentials(format!(
                "Profile '{profile}' not found or incomplete in {}",
                path.display()
            ))
        })
    }

    /// Extracts a profile from INI-formatted credentials text.
    fn parse_profile(content: &str, profile: &str) -> Option<Self> {
        let mut in_profile = false;
        let mut access_key_id = None;
        let mut secret_access_key = None;
        let mut session_token = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_profile = section.trim() == profile;
                continue;
            }
            if !in_profile {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().to_string();
                match key.trim() {
                    "aws_access_key_id" => access_key_id = Some(value),
                    "aws_secret_access_key" => secret_access_key = Some(value),
                    "aws_session_token" => session_token = Some(value),
                    _ => {}
                }
            }
        }

        Some(Self::new(access_key_id?, secret_access_key?, session_token))
    }
}

/// Scope of one signature.
#[derive(Debug, Clone)]
pub struct SigningParams<'a> {
    pub credentials: &'a Credentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl SigningParams<'_> {
    fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn short_date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.short_date(),
            self.region,
            self.service
        )
    }

    fn signing_key(&self) -> Result<Vec<u8>> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), self.short_date().as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }

    fn signature(&self, canonical_request: &str) -> Result<String> {
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{}\n{}",
            self.amz_date(),
            self.scope(),
            sha256_hex(canonical_request.as_bytes())
        );
        Ok(hex::encode(hmac_sha256(
            &self.signing_key()?,
            string_to_sign.as_bytes(),
        )?))
    }
}

/// Signs a request and returns the headers to attach to it.
///
/// `headers` are the caller's headers that should be covered by the
/// signature (e.g. `content-type`). The returned list contains `host`,
/// `x-amz-date`, `x-amz-security-token` when a session token exists,
/// and `authorization`.
pub fn sign_request(
    method: &str,
    url: &Url,
    headers: &[(String, String)],
    body: &[u8],
    params: &SigningParams<'_>,
) -> Result<Vec<(String, String)>> {
    let host = host_header(url)?;
    let amz_date = params.amz_date();

    let mut added = vec![
        ("host".to_string(), host),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(token) = &params.credentials.session_token {
        added.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let mut signed: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .chain(added.iter().cloned())
        .collect();
    signed.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers = signed.iter().fold(String::new(), |mut out, (k, v)| {
        let _ = writeln!(out, "{k}:{v}");
        out
    });
    let signed_headers = signed
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_uppercase(),
        canonical_path(url),
        canonical_query(url.query_pairs()),
        canonical_headers,
        signed_headers,
        sha256_hex(body)
    );

    let signature = params.signature(&canonical_request)?;
    added.push((
        "authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
            params.credentials.access_key_id,
            params.scope()
        ),
    ));

    Ok(added)
}

/// Produces a query-string presigned URL valid for `expires_secs`.
pub fn presign_url(url: &Url, expires_secs: u64, params: &SigningParams<'_>) -> Result<Url> {
    let host = host_header(url)?;
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.push(("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()));
    pairs.push((
        "X-Amz-Credential".to_string(),
        format!("{}/{}", params.credentials.access_key_id, params.scope()),
    ));
    pairs.push(("X-Amz-Date".to_string(), params.amz_date()));
    pairs.push(("X-Amz-Expires".to_string(), expires_secs.to_string()));
    pairs.push(("X-Amz-SignedHeaders".to_string(), "host".to_string()));
    if let Some(token) = &params.credentials.session_token {
        pairs.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }

    let query = canonical_query(
        pairs
            .iter()
            .map(|(k, v)| (Cow::Borrowed(k.as_str()), Cow::Borrowed(v.as_str()))),
    );
    let canonical_request = format!(
        "GET\n{}\n{query}\nhost:{host}\n\nhost\n{}",
        canonical_path(url),
        sha256_hex(b"")
    );
    let signature = params.signature(&canonical_request)?;

    let mut presigned = url.clone();
    presigned.set_query(Some(&format!("{query}&X-Amz-Signature={signature}")));
    Ok(presigned)
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| SandboxError::config(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn canonical_path(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query<'a, I>(pairs: I) -> String
where
    I: Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
{
    let mut encoded: Vec<(String, String)> = pairs
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes everything except RFC 3986 unreserved characters.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SandboxError::credentials(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_credentials() -> Credentials {
        Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            None,
        )
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_get_vanilla_signature() {
        let credentials = example_credentials();
        let params = SigningParams {
            credentials: &credentials,
            region: "us-east-1",
            service: "service",
            time: Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap(),
        };
        let url = Url::parse("https://example.amazon.com/").unwrap();

        let headers = sign_request("GET", &url, &[], b"", &params).unwrap();

        assert_eq!(header(&headers, "x-amz-date"), Some("20150830T123600Z"));
        assert_eq!(
            header(&headers, "authorization"),
            Some(
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
                 SignedHeaders=host;x-amz-date, \
                 Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
            )
        );
    }

    #[test]
    fn test_session_token_is_signed() {
        let credentials = Credentials::new("AKID", "SECRET", Some("TOKEN".to_string()));
        let params = SigningParams {
            credentials: &credentials,
            region: "us-west-2",
            service: SERVICE_NAME,
            time: Utc::now(),
        };
        let url = Url::parse("https://bedrock-agentcore.us-west-2.amazonaws.com/x?b=2&a=1").unwrap();
        let headers = sign_request(
            "POST",
            &url,
            &[("Content-Type".to_string(), "application/json".to_string())],
            b"{}",
            &params,
        )
        .unwrap();

        assert_eq!(header(&headers, "x-amz-security-token"), Some("TOKEN"));
        let auth = header(&headers, "authorization").unwrap();
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_presign_url_carries_signature() {
        let credentials = example_credentials();
        let params = SigningParams {
            credentials: &credentials,
            region: "us-east-1",
            service: SERVICE_NAME,
            time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        let url = Url::parse("https://example.com/browser-streams/b/sessions/s/live-view").unwrap();
        let presigned = presign_url(&url, 300, &params).unwrap();
        let query = presigned.query().unwrap();

        assert!(query.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(query.contains("X-Amz-Expires=300"));
        assert!(query.contains("X-Amz-Date=20240102T030405Z"));
        assert!(query.contains("X-Amz-Signature="));
        assert_eq!(presigned.path(), url.path());
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b/c~"), "a%20b%2Fc~");
        assert_eq!(uri_encode("AZaz09-_.~"), "AZaz09-_.~");
    }

    #[test]
    fn test_canonical_query_is_sorted() {
        let url = Url::parse("https://h/?b=2&a=1&a=0").unwrap();
        assert_eq!(canonical_query(url.query_pairs()), "a=0&a=1&b=2");
    }

    #[test]
    fn test_parse_profile() {
        let ini = "\
[default]
aws_access_key_id = AKID1
aws_secret_access_key = SECRET1

[work]
aws_access_key_id=AKID2
aws_secret_access_key=SECRET2
aws_session_token=TOKEN2
";
        let default = Credentials::parse_profile(ini, "default").unwrap();
        assert_eq!(default.access_key_id, "AKID1");
        assert!(default.session_token.is_none());

        let work = Credentials::parse_profile(ini, "work").unwrap();
        assert_eq!(work.secret_access_key, "SECRET2");
        assert_eq!(work.session_token.as_deref(), Some("TOKEN2"));

        assert!(Credentials::parse_profile(ini, "missing").is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("AKID", "SUPERSECRET", Some("TOK".to_string()));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("SUPERSECRET"));
        assert!(!debug.contains("TOK\""));
    }
}
