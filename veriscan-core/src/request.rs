//! Request descriptors and cache fingerprints.

use crate::DEFAULT_MAX_RETRIES;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file selected for upload.
///
/// The bytes are reference counted so that a retried upload resends exactly
/// the same content without copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    /// Multipart form with a single file part.
    Multipart { field: String, file: UploadFile },
}

/// Everything needed to (re)transmit one logical request.
///
/// `retry_count` never exceeds `max_retries`; [`RequestDescriptor::record_retry`]
/// is the only way it grows.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the API base URL, or an absolute `http(s)://` URL.
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Bypass the response cache for both reads and writes.
    pub skip_cache: bool,
    /// Never attach credentials and never react to a 401 on this request.
    pub skip_auth: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            skip_cache: false,
            skip_auth: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        let mut request = Self::new(Method::Post, url);
        request.body = Some(body);
        request
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retry_count = self.retry_count.min(max_retries);
        self
    }

    pub fn with_skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    pub fn with_skip_auth(mut self, skip_auth: bool) -> Self {
        self.skip_auth = skip_auth;
        self
    }

    /// Only GET requests that did not opt out may be served from or written to the cache.
    pub fn is_cache_eligible(&self) -> bool {
        self.method == Method::Get && !self.skip_cache
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace any header with the same (case-insensitive) name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove_header(&name);
        self.headers.push((name, value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    /// Consume one unit of retry budget. Returns false when the budget is spent.
    pub fn record_retry(&mut self) -> bool {
        if self.retry_count >= self.max_retries {
            return false;
        }
        self.retry_count += 1;
        true
    }

    pub fn retries_remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// Deterministic cache key of `(method, url, canonical params)`.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self.method, &self.url, &self.params)
    }
}

/// SHA-256 fingerprint of a request, hex encoded.
///
/// Parameters are sorted by key before hashing so insertion order never
/// changes the key. The sort is stable: values of a repeated key keep their
/// relative order, since `a=1&a=2` and `a=2&a=1` may mean different things
/// to the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(method: Method, url: &str, params: &[(String, String)]) -> Self {
        let mut sorted: Vec<(&str, &str)> = params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        // JSON encoding keeps separators unambiguous.
        let canonical = serde_json::json!([method.as_str(), url, sorted]).to_string();

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_param_order() {
        let a = RequestDescriptor::get("/api/history")
            .with_param("page", "2")
            .with_param("limit", "20");
        let b = RequestDescriptor::get("/api/history")
            .with_param("limit", "20")
            .with_param("page", "2");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_method_url_and_values() {
        let base = RequestDescriptor::get("/api/history").with_param("page", "1");
        let other_page = RequestDescriptor::get("/api/history").with_param("page", "2");
        let other_url = RequestDescriptor::get("/api/stats").with_param("page", "1");
        let mut other_method = base.clone();
        other_method.method = Method::Delete;

        assert_ne!(base.fingerprint(), other_page.fingerprint());
        assert_ne!(base.fingerprint(), other_url.fingerprint());
        assert_ne!(base.fingerprint(), other_method.fingerprint());
    }

    #[test]
    fn test_fingerprint_separators_are_unambiguous() {
        let a = RequestDescriptor::get("/a").with_param("x", "1&y=2");
        let b = RequestDescriptor::get("/a")
            .with_param("x", "1")
            .with_param("y", "2");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_keeps_repeated_key_order() {
        let a = RequestDescriptor::get("/a")
            .with_param("tag", "x")
            .with_param("tag", "y");
        let b = RequestDescriptor::get("/a")
            .with_param("tag", "y")
            .with_param("tag", "x");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let key = RequestDescriptor::get("/api/stats").fingerprint();
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_eligibility() {
        assert!(RequestDescriptor::get("/api/stats").is_cache_eligible());
        assert!(!RequestDescriptor::get("/api/stats")
            .with_skip_cache(true)
            .is_cache_eligible());
        let post =
            RequestDescriptor::post("/api/analyze", RequestBody::Json(serde_json::json!({})));
        assert!(!post.is_cache_eligible());
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut request =
            RequestDescriptor::get("/api/stats").with_header("Authorization", "Bearer a");
        request.set_header("authorization", "Bearer b");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer b"));

        request.remove_header("Authorization");
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn test_record_retry_respects_budget() {
        let mut request = RequestDescriptor::get("/api/stats").with_max_retries(2);
        assert!(request.record_retry());
        assert!(request.record_retry());
        assert!(!request.record_retry());
        assert_eq!(request.retry_count, 2);
        assert_eq!(request.retries_remaining(), 0);
    }

    #[test]
    fn test_upload_file_size() {
        let file = UploadFile::new("photo.jpg", "image/jpeg", vec![0u8; 42]);
        assert_eq!(file.size(), 42);
    }
}
