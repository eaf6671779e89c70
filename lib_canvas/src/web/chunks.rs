//! # Chunk Routes
//!
//! `GET /chunks/:c/:x/:y.bmp`, `GET /chunks/:c/:x/:y/:z.bmp` and
//! `GET /chunks/templates/:c/:x/:y.bmp`. Every segment must be all ASCII
//! digits; anything else is a 404 without touching the chunk source. The zoom
//! digits are optional on their own, so `/chunks/:c/:x/:y/.bmp` is the
//! unzoomed chunk.
//!
//! Chunk bodies are opaque bytes. How they are produced is up to the
//! [`ChunkSource`]; [`DirChunkSource`] reads them from a directory tree.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use thiserror::Error;
use tracing::error;

use super::CanvasContext;

const CHUNK_CACHE_CONTROL: &str = "public, max-age=60";

/// Errors from a chunk source.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Reading the chunk failed for a reason other than absence.
    #[error("could not read chunk {path}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Where chunk bitmaps come from.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// A canvas chunk, `z` selecting a zoom level when present. `None` when
    /// the chunk does not exist.
    async fn chunk(&self, canvas: u32, x: u32, y: u32, z: Option<u32>) -> Result<Option<Bytes>, ChunkError>;

    /// A template chunk.
    async fn template_chunk(&self, canvas: u32, x: u32, y: u32) -> Result<Option<Bytes>, ChunkError>;
}

/// # Directory Chunk Source
///
/// Layout: `<root>/<c>/<x>/<y>.bmp`, `<root>/<c>/<x>/<y>/<z>.bmp` and
/// `<root>/templates/<c>/<x>/<y>.bmp`.
#[derive(Debug, Clone)]
pub struct DirChunkSource {
    root: PathBuf,
}

impl DirChunkSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read(&self, path: PathBuf) -> Result<Option<Bytes>, ChunkError> {
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ChunkError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl ChunkSource for DirChunkSource {
    async fn chunk(&self, canvas: u32, x: u32, y: u32, z: Option<u32>) -> Result<Option<Bytes>, ChunkError> {
        let mut path = self.root.join(canvas.to_string()).join(x.to_string());
        match z {
            Some(z) => path.push(format!("{y}/{z}.bmp")),
            None => path.push(format!("{y}.bmp")),
        }
        self.read(path).await
    }

    async fn template_chunk(&self, canvas: u32, x: u32, y: u32) -> Result<Option<Bytes>, ChunkError> {
        let path = self
            .root
            .join("templates")
            .join(canvas.to_string())
            .join(x.to_string())
            .join(format!("{y}.bmp"));
        self.read(path).await
    }
}

/// Parses an all-digit segment. Signs, spaces and empty strings are rejected.
pub fn parse_numeric(segment: &str) -> Option<u32> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Parses the final `<digits>.bmp` segment.
pub fn parse_bmp_segment(segment: &str) -> Option<u32> {
    segment.strip_suffix(".bmp").and_then(parse_numeric)
}

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn bitmap_response(result: Result<Option<Bytes>, ChunkError>) -> Response {
    match result {
        Ok(Some(data)) => (
            [(CONTENT_TYPE, "application/octet-stream"), (CACHE_CONTROL, CHUNK_CACHE_CONTROL)],
            data,
        )
            .into_response(),
        Ok(None) => not_found(),
        Err(e) => {
            error!(error = %e, cause = ?e, "chunk source failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /chunks/{c}/{x}/{y}.bmp`
pub async fn chunk(State(ctx): State<CanvasContext>, Path((c, x, y)): Path<(String, String, String)>) -> Response {
    match (parse_numeric(&c), parse_numeric(&x), parse_bmp_segment(&y)) {
        (Some(c), Some(x), Some(y)) => bitmap_response(ctx.chunks.chunk(c, x, y, None).await),
        _ => not_found(),
    }
}

/// Parses the zoom segment: `<digits>.bmp`, or a bare `.bmp` for no zoom.
pub fn parse_zoom_segment(segment: &str) -> Option<Option<u32>> {
    match segment {
        ".bmp" => Some(None),
        _ => parse_bmp_segment(segment).map(Some),
    }
}

/// `GET /chunks/{c}/{x}/{y}/{z}.bmp` and `GET /chunks/{c}/{x}/{y}/.bmp`
pub async fn zoomed_chunk(
    State(ctx): State<CanvasContext>,
    Path((c, x, y, z)): Path<(String, String, String, String)>,
) -> Response {
    match (parse_numeric(&c), parse_numeric(&x), parse_numeric(&y), parse_zoom_segment(&z)) {
        (Some(c), Some(x), Some(y), Some(z)) => bitmap_response(ctx.chunks.chunk(c, x, y, z).await),
        _ => not_found(),
    }
}

/// `GET /chunks/templates/{c}/{x}/{y}.bmp`
pub async fn template_chunk(
    State(ctx): State<CanvasContext>,
    Path((c, x, y)): Path<(String, String, String)>,
) -> Response {
    match (parse_numeric(&c), parse_numeric(&x), parse_bmp_segment(&y)) {
        (Some(c), Some(x), Some(y)) => bitmap_response(ctx.chunks.template_chunk(c, x, y).await),
        _ => not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_parsing() {
        assert_eq!(parse_numeric("0"), Some(0));
        assert_eq!(parse_numeric("0042"), Some(42));
        assert_eq!(parse_numeric("+4"), None);
        assert_eq!(parse_numeric("-4"), None);
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("4a"), None);
        assert_eq!(parse_numeric("99999999999"), None);

        assert_eq!(parse_bmp_segment("17.bmp"), Some(17));
        assert_eq!(parse_bmp_segment("17"), None);
        assert_eq!(parse_bmp_segment(".bmp"), None);
        assert_eq!(parse_bmp_segment("x.bmp"), None);
        assert_eq!(parse_bmp_segment("17.png"), None);

        assert_eq!(parse_zoom_segment(".bmp"), Some(None));
        assert_eq!(parse_zoom_segment("3.bmp"), Some(Some(3)));
        assert_eq!(parse_zoom_segment("bmp"), None);
        assert_eq!(parse_zoom_segment("x.bmp"), None);
    }

    #[tokio::test]
    async fn test_dir_source_layout() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("0/3/4")).unwrap();
        std::fs::create_dir_all(root.path().join("templates/1/2")).unwrap();
        std::fs::write(root.path().join("0/3/4.bmp"), b"flat").unwrap();
        std::fs::write(root.path().join("0/3/4/5.bmp"), b"zoomed").unwrap();
        std::fs::write(root.path().join("templates/1/2/3.bmp"), b"template").unwrap();

        let source = DirChunkSource::new(root.path());
        assert_eq!(source.chunk(0, 3, 4, None).await.unwrap(), Some(Bytes::from_static(b"flat")));
        assert_eq!(source.chunk(0, 3, 4, Some(5)).await.unwrap(), Some(Bytes::from_static(b"zoomed")));
        assert_eq!(source.template_chunk(1, 2, 3).await.unwrap(), Some(Bytes::from_static(b"template")));
        assert_eq!(source.chunk(9, 9, 9, None).await.unwrap(), None);
    }
}
