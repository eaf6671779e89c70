//! # Public Directory
//!
//! Serves files from the public directory ahead of the page routes. A request
//! for `/about` also finds `about.html`. When no file matches, the request
//! falls through untouched to the routes behind it.

use std::path::Path;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::{header::CACHE_CONTROL, HeaderValue, Method, StatusCode, Uri};
use tower::ServiceExt;
use tower_http::services::ServeDir;

/// Three months.
pub const STATIC_CACHE_CONTROL: &str = "public, max-age=7776000";

/// # Static Files
///
/// Shared handle on the public directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    dir: ServeDir,
    cache_control: HeaderValue,
}

impl StaticFiles {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: ServeDir::new(root).append_index_html_on_directories(true),
            cache_control: HeaderValue::from_static(STATIC_CACHE_CONTROL),
        }
    }

    /// Serves the request from disk, or `None` when no file matches.
    pub async fn try_serve(&self, method: &Method, uri: &Uri, headers: &http::HeaderMap) -> Option<Response> {
        if let Some(found) = self.probe(method, uri, headers).await {
            return Some(found);
        }
        let path = uri.path();
        let last = path.rsplit('/').next().unwrap_or_default();
        if last.is_empty() || last.contains('.') {
            return None;
        }
        let with_html = match uri.query() {
            Some(query) => format!("{path}.html?{query}"),
            None => format!("{path}.html"),
        };
        let with_html: Uri = with_html.parse().ok()?;
        self.probe(method, &with_html, headers).await
    }

    async fn probe(&self, method: &Method, uri: &Uri, headers: &http::HeaderMap) -> Option<Response> {
        let mut request = Request::new(Body::empty());
        *request.method_mut() = method.clone();
        *request.uri_mut() = uri.clone();
        *request.headers_mut() = headers.clone();

        let response = match self.dir.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        if response.status() == StatusCode::NOT_FOUND {
            return None;
        }
        let mut response = response.map(Body::new);
        if response.status().is_success() || response.status() == StatusCode::NOT_MODIFIED {
            response.headers_mut().insert(CACHE_CONTROL, self.cache_control.clone());
        }
        Some(response)
    }
}

/// Middleware answering `GET`/`HEAD` from the public directory first.
pub async fn serve_static(State(files): State<StaticFiles>, request: Request, next: Next) -> Response {
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return next.run(request).await;
    }
    match files.try_serve(request.method(), request.uri(), request.headers()).await {
        Some(response) => response,
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, middleware, routing::any, Router};

    fn fixture() -> (tempfile::TempDir, Router) {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("app.js"), "console.log(1)").unwrap();
        std::fs::write(root.path().join("about.html"), "<p>about</p>").unwrap();
        let app = Router::new()
            .fallback(any(|| async { "fell through" }))
            .layer(middleware::from_fn_with_state(StaticFiles::new(root.path()), serve_static));
        (root, app)
    }

    async fn get(app: &Router, method: Method, uri: &str) -> (StatusCode, Option<HeaderValue>, String) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cache = response.headers().get(CACHE_CONTROL).cloned();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, cache, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_existing_file_served_with_long_cache() {
        let (_root, app) = fixture();
        let (status, cache, body) = get(&app, Method::GET, "/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.unwrap(), STATIC_CACHE_CONTROL);
        assert_eq!(body, "console.log(1)");
    }

    #[tokio::test]
    async fn test_implicit_html_extension() {
        let (_root, app) = fixture();
        let (status, _, body) = get(&app, Method::GET, "/about?lang=en").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<p>about</p>");
    }

    #[tokio::test]
    async fn test_missing_files_and_other_methods_fall_through() {
        let (_root, app) = fixture();
        for (method, uri) in [
            (Method::GET, "/missing"),
            (Method::GET, "/missing.js"),
            (Method::GET, "/"),
            (Method::POST, "/app.js"),
        ] {
            let (status, cache, body) = get(&app, method, uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body, "fell through", "{uri}");
            assert!(cache.is_none());
        }
    }

    #[test]
    fn test_cache_lifetime_is_three_months() {
        let max_age: u64 = STATIC_CACHE_CONTROL.rsplit('=').next().unwrap().parse().unwrap();
        assert_eq!(max_age, 90 * 24 * 60 * 60);
    }
}
