//! # HTTP Surface
//!
//! Precedence, first match wins:
//!
//! 1. `/api/*`, `/tiles/*`: delegated, never compressed
//! 2. gzip (level 3) from here on, chunk bitmaps included
//! 3. files from the public directory (falls through when absent)
//! 4. `/discord`: 302 to the invite
//! 5. numeric chunk and template chunk bitmaps
//! 6. `/admintools/*`, `/reset_password/*`: delegated
//! 7. `/globe`, `/`, `/invite/*`, `/error`: cache-aware pages
//!
//! Page and redirect paths also answer with one trailing slash (`/globe/`,
//! `/invite/`, `/discord/`).
//!
//! Upgrade requests never reach any of this; the upgrade gate sits on top.

use std::path::PathBuf;

use axum::{
    extract::State,
    http::{header::LOCATION, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tower_http::{
    compression::{CompressionLayer, CompressionLevel},
    services::ServeDir,
};

use super::{chunks, pages, static_files::serve_static, upgrade::upgrade_gate, CanvasContext};

/// Route trees owned by other parts of the service.
#[derive(Default)]
pub struct RouteCollaborators {
    /// Mounted at `/api`.
    pub api: Option<Router>,
    /// Served at `/tiles`.
    pub tiles_dir: Option<PathBuf>,
    /// Mounted at `/admintools`.
    pub admintools: Option<Router>,
    /// Mounted at `/reset_password`.
    pub reset_password: Option<Router>,
}

async fn health() -> &'static str {
    "OK"
}

async fn discord(State(ctx): State<CanvasContext>) -> Response {
    (StatusCode::FOUND, [(LOCATION, ctx.discord_invite.to_string())]).into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Builds the complete application router.
pub fn build_router(ctx: CanvasContext, collaborators: RouteCollaborators) -> Router {
    let RouteCollaborators {
        api,
        tiles_dir,
        admintools,
        reset_password,
    } = collaborators;

    let mut site = Router::new()
        .route("/health", get(health))
        .route("/discord", any(discord))
        .route("/discord/", any(discord))
        .route("/discord/{*rest}", any(discord))
        .route("/chunks/templates/{c}/{x}/{y}", get(chunks::template_chunk))
        .route("/chunks/{c}/{x}/{y}", get(chunks::chunk))
        .route("/chunks/{c}/{x}/{y}/{z}", get(chunks::zoomed_chunk))
        .route("/globe", get(pages::globe_page))
        .route("/globe/", get(pages::globe_page))
        .route("/", get(pages::main_page))
        .route("/invite/", get(pages::main_page))
        .route("/invite/{*rest}", get(pages::main_page))
        .route("/error", get(pages::main_page))
        .route("/error/", get(pages::main_page));

    if let Some(admintools) = admintools {
        site = site.nest_service("/admintools", admintools);
    }
    if let Some(reset_password) = reset_password {
        site = site.nest_service("/reset_password", reset_password);
    }

    let site = site
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(ctx.static_files.clone(), serve_static))
        .layer(CompressionLayer::new().quality(CompressionLevel::Precise(3)))
        .with_state(ctx.clone());

    let mut app = Router::new();
    if let Some(api) = api {
        app = app.nest_service("/api", api);
    }
    if let Some(tiles_dir) = tiles_dir {
        app = app.nest_service("/tiles", ServeDir::new(tiles_dir));
    }

    app.merge(site)
        .layer(middleware::from_fn_with_state(ctx.upgrades, upgrade_gate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channels::SocketServer,
        core::upgrade_router::UpgradeRouter,
        web::{pages::AssetEntry, AssetManifest, DirChunkSource, PageCache, StaticFiles},
    };
    use axum::body::{to_bytes, Body};
    use http::{
        header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
        HeaderValue, Request,
    };
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        _public: TempDir,
        _chunks: TempDir,
        _tiles: TempDir,
        user: SocketServer,
        api: SocketServer,
        app: Router,
    }

    fn manifest() -> AssetManifest {
        AssetManifest {
            globe: AssetEntry { js: "/globe.11.js".into() },
            vendor: AssetEntry { js: "/vendor.22.js".into() },
            client: AssetEntry { js: "/client.33.js".into() },
        }
    }

    fn fixture() -> Fixture {
        let public = tempfile::tempdir().unwrap();
        std::fs::write(public.path().join("error.html"), "static error page").unwrap();
        std::fs::write(public.path().join("robots.txt"), "User-agent: *").unwrap();

        let chunks = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(chunks.path().join("0/1")).unwrap();
        std::fs::write(chunks.path().join("0/1/2.bmp"), vec![7u8; 4096]).unwrap();

        let tiles = tempfile::tempdir().unwrap();
        std::fs::write(tiles.path().join("tile.txt"), "x".repeat(4096)).unwrap();

        let user = SocketServer::user();
        let api = SocketServer::api();
        let ctx = CanvasContext::new(
            PageCache::build(manifest(), 900).unwrap(),
            "https://discord.gg/canvas",
            Arc::new(DirChunkSource::new(chunks.path())),
            StaticFiles::new(public.path()),
            UpgradeRouter::new(Arc::new(user.clone()), Arc::new(api.clone())),
        );
        let collaborators = RouteCollaborators {
            api: Some(Router::new().route("/me", get(|| async { "y".repeat(4096) }))),
            tiles_dir: Some(tiles.path().to_path_buf()),
            admintools: Some(Router::new().route("/", get(|| async { "admin" }))),
            reset_password: Some(Router::new().route("/", get(|| async { "reset" }))),
        };
        Fixture {
            _public: public,
            _chunks: chunks,
            _tiles: tiles,
            user,
            api,
            app: build_router(ctx, collaborators),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn gzip_req(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_discord_redirects() {
        let f = fixture();
        for uri in ["/discord", "/discord/", "/discord/anything"] {
            let (status, headers, _) = send(&f.app, get_req(uri)).await;
            assert_eq!(status, StatusCode::FOUND);
            assert_eq!(headers[LOCATION], "https://discord.gg/canvas");
        }
    }

    #[tokio::test]
    async fn test_chunks_are_numeric_only_and_compressed() {
        let f = fixture();

        let (status, headers, body) = send(&f.app, get_req("/chunks/0/1/2.bmp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(body.len(), 4096);

        let (status, headers, body) = send(&f.app, gzip_req("/chunks/0/1/2.bmp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_ENCODING], "gzip");
        assert!(body.len() < 4096);

        // Empty zoom digits mean the unzoomed chunk.
        let (status, _, body) = send(&f.app, get_req("/chunks/0/1/2/.bmp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), 4096);

        for uri in [
            "/chunks/a/1/2.bmp",
            "/chunks/0/1/2.png",
            "/chunks/0/1/x/2.bmp",
            "/chunks/0/1/3.bmp",
            "/chunks/0/1/2/bmp",
        ] {
            let (status, _, _) = send(&f.app, get_req(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_api_and_tiles_are_not_compressed() {
        let f = fixture();
        for uri in ["/api/me", "/tiles/tile.txt"] {
            let (status, headers, body) = send(&f.app, gzip_req(uri)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert!(headers.get(CONTENT_ENCODING).is_none(), "{uri} was compressed");
            assert_eq!(body.len(), 4096);
        }
    }

    #[tokio::test]
    async fn test_static_files_take_precedence_over_pages() {
        let f = fixture();
        let (status, headers, body) = send(&f.app, get_req("/error")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"static error page");
        assert_eq!(headers["cache-control"], "public, max-age=7776000");

        let (_, _, body) = send(&f.app, get_req("/robots.txt")).await;
        assert_eq!(body, b"User-agent: *");
    }

    #[tokio::test]
    async fn test_delegated_routes() {
        let f = fixture();
        let (_, _, body) = send(&f.app, get_req("/admintools")).await;
        assert_eq!(body, b"admin");
        let (_, _, body) = send(&f.app, get_req("/reset_password")).await;
        assert_eq!(body, b"reset");
    }

    #[tokio::test]
    async fn test_pages_are_cache_aware() {
        let f = fixture();

        let (status, headers, body) = send(&f.app, get_req("/globe")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("/globe.11.js"));
        let tag = headers[ETAG].clone();

        let request = Request::get("/globe").header(IF_NONE_MATCH, tag.clone()).body(Body::empty()).unwrap();
        let (status, _, body) = send(&f.app, request).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(body.is_empty());

        let (status, headers, _) = send(&f.app, get_req("/globe/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[ETAG], tag);

        for uri in ["/", "/invite/", "/invite/abc", "/error/"] {
            let (status, headers, body) = send(&f.app, get_req(uri)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(headers["cache-control"], "private, max-age=900");
            assert!(String::from_utf8(body).unwrap().contains("/client.33.js"));
        }
    }

    #[tokio::test]
    async fn test_unknown_paths_and_health() {
        let f = fixture();
        let (status, _, _) = send(&f.app, get_req("/definitely/not/here")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, body) = send(&f.app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    fn upgrade_req(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("connection", HeaderValue::from_static("Upgrade"))
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_upgrade_requests_bypass_routes() {
        let f = fixture();

        // A page route must not answer an upgrade request.
        let (status, headers, _) = send(&f.app, upgrade_req("/globe")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers["connection"], "close");

        // Without a hyper connection the handshake cannot complete; the channel
        // closes it, the router does not.
        let (status, _, _) = send(&f.app, upgrade_req("/ws")).await;
        assert_ne!(status, StatusCode::BAD_REQUEST);
        assert!(status.is_client_error());
        assert_eq!(f.user.client_count(), 0);
        assert_eq!(f.api.client_count(), 0);
    }
}
