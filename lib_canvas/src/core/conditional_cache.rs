//! # Conditional Cache
//!
//! Generated pages are rendered once at startup from fixed inputs (asset
//! fingerprints). Each page keeps a weak entity tag derived from those inputs,
//! and a request whose `If-None-Match` equals the tag is answered with an empty
//! 304 instead of the body.
//!
//! Comparison is exact string equality against the raw header value, so a
//! validator list (`"a", "b"`) or `*` never matches.

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use http::{
    header::{InvalidHeaderValue, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    HeaderMap, HeaderName, HeaderValue, StatusCode,
};
use sha2::{Digest, Sha256};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const DIGEST_CHARS: usize = 27;

/// Computes the weak entity tag of a tag input: `W/"<len hex>-<digest>"`, where
/// the digest is the first 27 characters of the base64 SHA-256 of the input.
pub fn entity_tag(input: &str) -> String {
    let mut digest = STANDARD.encode(Sha256::digest(input.as_bytes()));
    digest.truncate(DIGEST_CHARS);
    format!("W/\"{:x}-{}\"", input.len(), digest)
}

/// What to send for a given validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Validator equals the stored tag: 304, no body.
    NotModified,
    /// Validator absent or different: 200 with the body.
    Full,
}

/// # Cached Page
///
/// A page body with its tag and cache headers, built once and shared by every
/// request for the route.
#[derive(Debug, Clone)]
pub struct CachedPage {
    tag: String,
    etag: HeaderValue,
    cache_control: HeaderValue,
    body: Bytes,
}

impl CachedPage {
    /// Builds a page from its tag input, its pre-rendered body and the
    /// `max-age` advertised to clients.
    pub fn new(tag_input: &str, body: impl Into<Bytes>, max_age_secs: u64) -> Result<Self, InvalidHeaderValue> {
        let tag = entity_tag(tag_input);
        let etag = HeaderValue::from_str(&tag)?;
        let cache_control = HeaderValue::from_str(&format!("private, max-age={max_age_secs}"))?;
        Ok(Self {
            tag,
            etag,
            cache_control,
            body: body.into(),
        })
    }

    /// The stored entity tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The pre-rendered body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Compares a client validator against the stored tag.
    pub fn decide(&self, validator: Option<&str>) -> CacheDecision {
        match validator {
            Some(v) if v == self.tag => CacheDecision::NotModified,
            _ => CacheDecision::Full,
        }
    }

    /// Answers a request with the stored body or a 304.
    pub fn respond(&self, headers: &HeaderMap) -> Response {
        self.respond_with(headers, || self.body.clone())
    }

    /// Like [`respond`](Self::respond) but renders the body on a miss. The tag
    /// stays the stored one whatever `render` returns.
    pub fn respond_with<B, F>(&self, headers: &HeaderMap, render: F) -> Response
    where
        B: Into<Body>,
        F: FnOnce() -> B,
    {
        let validator = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
        match self.decide(validator) {
            CacheDecision::NotModified => (StatusCode::NOT_MODIFIED, self.cache_headers()).into_response(),
            CacheDecision::Full => {
                let body: Body = render().into();
                (StatusCode::OK, self.cache_headers(), body).into_response()
            }
        }
    }

    fn cache_headers(&self) -> [(HeaderName, HeaderValue); 3] {
        [
            (CACHE_CONTROL, self.cache_control.clone()),
            (ETAG, self.etag.clone()),
            (CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE)),
        ]
    }
}
