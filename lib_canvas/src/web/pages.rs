//! # Generated Pages
//!
//! The globe page and the main page are plain functions of the build-time
//! asset fingerprints (and, for the main page, a start coordinate). Both are
//! rendered once into a [`PageCache`] at startup.

use std::{
    fs,
    path::{Path, PathBuf},
};

use axum::{body::Body, extract::State, response::Response};
use http::{header::InvalidHeaderValue, HeaderMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CanvasContext;
use crate::{core::conditional_cache::CachedPage, utils::location::cc_to_coords};

/// Header set by the CDN with the client's ISO country code.
pub const COUNTRY_HEADER: &str = "cf-ipcountry";

/// Errors while loading the asset manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The file could not be read.
    #[error("could not read asset manifest {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid manifest.
    #[error("invalid asset manifest {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One bundle entry of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Fingerprinted script URL.
    pub js: String,
}

/// # Asset Manifest
///
/// Fingerprinted bundle URLs written by the front-end build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub globe: AssetEntry,
    pub vendor: AssetEntry,
    pub client: AssetEntry,
}

impl AssetManifest {
    /// Reads a manifest from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ManifestError> {
        let raw = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Tag input of the globe page.
    pub fn globe_tag_input(&self) -> String {
        self.globe.js.clone()
    }

    /// Tag input of the main page.
    pub fn main_tag_input(&self) -> String {
        format!("{},{}", self.vendor.js, self.client.js)
    }
}

/// Renders the 3D globe page.
pub fn render_globe(assets: &AssetManifest) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>PixelPlanet.fun 3DGlobe</title>
    <meta name="description" content="A 3D globe of our whole map" />
    <meta name="viewport" content="width=device-width, initial-scale=1, maximum-scale=1" />
    <link rel="icon" href="/favicon.ico" type="image/x-icon" />
  </head>
  <body>
    <div id="webgl" />
    <div id="coorbox">(0, 0)</div>
    <div id="info">Double click on globe to go back.</div>
    <div id="loading">Loading...</div>
    <script src="{globe}"></script>
  </body>
</html>
"#,
        globe = assets.globe.js
    )
}

/// Renders the main page starting at `coords`.
pub fn render_main(assets: &AssetManifest, coords: [i32; 2]) -> String {
    let [x, y] = coords;
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>PixelPlanet.fun</title>
    <meta name="description" content="Place color pixels on a map styled canvas with other players online" />
    <meta name="viewport" content="user-scalable=no, width=device-width, initial-scale=1.0, maximum-scale=1.0" />
    <link rel="icon" href="/favicon.ico" type="image/x-icon" />
    <script>window.coordx={x};window.coordy={y};</script>
  </head>
  <body>
    <div id="app"></div>
    <script src="{vendor}"></script>
    <script src="{client}"></script>
  </body>
</html>
"#,
        vendor = assets.vendor.js,
        client = assets.client.js,
    )
}

/// # Page Cache
///
/// Both generated pages with their tags, built once per process.
#[derive(Debug, Clone)]
pub struct PageCache {
    assets: AssetManifest,
    globe: CachedPage,
    main: CachedPage,
}

impl PageCache {
    /// Renders both pages and computes their tags.
    pub fn build(assets: AssetManifest, max_age_secs: u64) -> Result<Self, InvalidHeaderValue> {
        let globe = CachedPage::new(&assets.globe_tag_input(), render_globe(&assets), max_age_secs)?;
        let main = CachedPage::new(&assets.main_tag_input(), render_main(&assets, [0, 0]), max_age_secs)?;
        Ok(Self { assets, globe, main })
    }

    pub fn globe(&self) -> &CachedPage {
        &self.globe
    }

    pub fn main(&self) -> &CachedPage {
        &self.main
    }

    /// Globe page response for a request.
    pub fn globe_response(&self, headers: &HeaderMap) -> Response {
        self.globe.respond(headers)
    }

    /// Main page response; on a miss the body is rendered for the country in
    /// `CF-IPCountry`. Every request shares the same tag.
    pub fn main_response(&self, headers: &HeaderMap) -> Response {
        let country = headers.get(COUNTRY_HEADER).and_then(|v| v.to_str().ok());
        self.main.respond_with(headers, || match country {
            None => Body::from(self.main.body().clone()),
            Some(code) => Body::from(render_main(&self.assets, cc_to_coords(code))),
        })
    }
}

/// `GET /globe`
pub async fn globe_page(State(ctx): State<CanvasContext>, headers: HeaderMap) -> Response {
    ctx.pages.globe_response(&headers)
}

/// `GET /`, `GET /invite/*`, `GET /error`
pub async fn main_page(State(ctx): State<CanvasContext>, headers: HeaderMap) -> Response {
    ctx.pages.main_response(&headers)
}
