use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::downloader::fragment_path;
use crate::error::{Error, Result};
use crate::png;

/// Serves fragment files in a fixed round-robin order.
pub struct MirrorState {
    fragments: Vec<PathBuf>,
    cursor: AtomicUsize,
    header: HeaderName,
}

impl MirrorState {
    /// Load `<dir>/0.png .. <dir>/<total-1>.png`, checking each one is a PNG.
    pub fn from_dir(dir: &Path, total: usize, header: &str) -> Result<Self> {
        if total == 0 {
            return Err(Error::Config("mirror needs at least one fragment".into()));
        }
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| Error::Config(format!("invalid fragment header {:?}: {}", header, e)))?;

        let fragments = (0..total)
            .map(|i| {
                let path = fragment_path(dir, i);
                png::read_header(&path)?;
                Ok(path)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            fragments,
            cursor: AtomicUsize::new(0),
            header,
        })
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    fn next_index(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % self.fragments.len()
    }
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
    img: Option<u32>,
}

async fn image(State(state): State<Arc<MirrorState>>, Query(query): Query<ImageQuery>) -> Response {
    let Some(img) = query.img else {
        return (StatusCode::BAD_REQUEST, "missing img parameter").into_response();
    };

    let index = state.next_index();
    let file = match tokio::fs::File::open(&state.fragments[index]).await {
        Ok(file) => file,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("fragment {} unavailable: {}", index, err),
            )
                .into_response();
        }
    };
    debug!(img, seq = index, "serving fragment");

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(state.header.clone(), HeaderValue::from(index));
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("image/png"));
    response
}

async fn root(State(state): State<Arc<MirrorState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "pngfetch mirror",
        "version": env!("CARGO_PKG_VERSION"),
        "fragments": state.len(),
        "header": state.header.as_str(),
        "endpoints": {
            "image": "GET /image?img=<n>"
        }
    }))
}

pub fn build_app(state: Arc<MirrorState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/image", get(image))
        .with_state(state)
}

pub async fn startup(
    dir: PathBuf,
    address: String,
    port: u16,
    fragments: usize,
    header: String,
) -> Result<()> {
    let state = Arc::new(MirrorState::from_dir(&dir, fragments, &header)?);
    let app = build_app(state);

    let addr = format!("{}:{}", address, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, dir = %dir.display(), fragments, "mirror listening");

    axum::serve(listener, app).await?;
    Ok(())
}
