//! HTTP server for the storage API
//!
//! Provides /v1/info, /v1/blobs, /v1/blobs/{id} and the namespaced path
//! endpoints /v1/{namespace}/{*path}.

use crate::error::AppError;
use crate::namespaces::Namespaces;
use crate::storage::{Mutation, Resolved, Storage};
use crate::types::{
    parse_range, BlobRef, InfoResponse, LeafResponse, MutateRequest, NodeResponse,
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, put},
    Router,
};
use gadgetron_blob_store::{BlobId, CHUNK_SIZE};
use gadgetron_storage_db::LeafPath;
use std::future::Future;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::info;

const SERVER_NAME: &str = "Gadgetron Storage Manager";

/// Shared state for the HTTP server
pub struct ServerState {
    pub storage: Storage,
    pub namespaces: Namespaces,
}

impl ServerState {
    pub fn new(storage: Storage, namespaces: Namespaces) -> Self {
        Self {
            storage,
            namespaces,
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/info", get(info))
        // Uploads stream to disk, so the body is unbounded
        .route("/v1/blobs", put(put_blob).layer(DefaultBodyLimit::disable()))
        .route("/v1/blobs/{id}", get(get_blob))
        .route("/v1/{namespace}", get(get_namespace))
        .route("/v1/{namespace}/{*path}", get(get_node).patch(patch_node))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, returning once `shutdown` resolves and
/// in-flight requests have drained
pub async fn start_server(
    state: SharedState,
    address: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind((address, port)).await?;
    info!("Accepting connections on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn info() -> Json<InfoResponse> {
    Json(InfoResponse {
        server: SERVER_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// PUT /v1/blobs
async fn put_blob(State(state): State<SharedState>, body: Body) -> Result<Json<BlobRef>, AppError> {
    let id = state.storage.put_blob(body.into_data_stream()).await?;
    Ok(Json(BlobRef::new(id)))
}

/// GET /v1/blobs/{id}
///
/// Blobs are immutable, so the id doubles as a strong ETag. A single byte
/// range is honoured with 206; a range outside the blob gets 416.
async fn get_blob(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id: BlobId = id
        .parse()
        .map_err(|_| AppError::NotFound(format!("Not found: blob {}", id)))?;
    let etag = format!("\"{}\"", id);

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| etag_matches(v, &etag));
    let range = if not_modified {
        None
    } else {
        headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range)
    };

    let reader = state.storage.get_blob(&id, range).await?;
    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, reader.len())
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, &etag);
    if range.is_some() {
        let last = reader.offset() + reader.len() - 1;
        response = response.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", reader.offset(), last, reader.total()),
        );
    }

    let body = if reader.is_empty() {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::with_capacity(reader, CHUNK_SIZE))
    };
    response
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || tag == etag || tag.strip_prefix("W/") == Some(etag))
}

/// GET /v1/{namespace}
async fn get_namespace(
    State(state): State<SharedState>,
    Path(namespace): Path<String>,
) -> Result<Json<NodeResponse>, AppError> {
    let path = leaf_path(&state.namespaces, &namespace, "")?;
    resolve(&state, &path).await
}

/// GET /v1/{namespace}/{*path}
async fn get_node(
    State(state): State<SharedState>,
    Path((namespace, rest)): Path<(String, String)>,
) -> Result<Json<NodeResponse>, AppError> {
    let path = leaf_path(&state.namespaces, &namespace, &rest)?;
    resolve(&state, &path).await
}

async fn resolve(state: &ServerState, path: &LeafPath) -> Result<Json<NodeResponse>, AppError> {
    let node = match state.storage.resolve_or_list_children(path).await? {
        Resolved::Leaf(leaf) => NodeResponse::Leaf(leaf.into()),
        Resolved::Children(paths) => NodeResponse::Children(paths),
    };
    Ok(Json(node))
}

/// PATCH /v1/{namespace}/{*path}
async fn patch_node(
    State(state): State<SharedState>,
    Path((namespace, rest)): Path<(String, String)>,
    Json(request): Json<MutateRequest>,
) -> Result<Json<LeafResponse>, AppError> {
    let path = leaf_path(&state.namespaces, &namespace, &rest)?;
    if path.as_str() == namespace {
        return Err(AppError::BadRequest(format!(
            "Cannot store data at namespace root: {}",
            namespace
        )));
    }

    let timeout = state.namespaces.timeout(&namespace).flatten();
    let mutation = Mutation {
        operation: request.operation,
        blobs: request.arguments,
        leaf_type: request.leaf_type,
    };

    let leaf = state.storage.mutate_leaf(&path, &mutation, timeout).await?;
    Ok(Json(leaf.into()))
}

fn leaf_path(namespaces: &Namespaces, namespace: &str, rest: &str) -> Result<LeafPath, AppError> {
    if !namespaces.contains(namespace) {
        return Err(AppError::NotFound(format!("Unknown namespace: {}", namespace)));
    }
    LeafPath::within(namespace, rest).map_err(|e| AppError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::test_storage;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_router() -> (TempDir, Router) {
        let (dir, storage) = test_storage().await;
        let state = Arc::new(ServerState::new(storage, Namespaces::default()));
        (dir, create_router(state))
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(router, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn with_header(uri: &str, name: header::HeaderName, value: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    fn upload(data: &[u8]) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/v1/blobs")
            .body(Body::from(data.to_vec()))
            .unwrap()
    }

    fn patch(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PATCH")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_info_endpoint() {
        let (_dir, router) = test_router().await;
        let (status, json) = send_json(&router, get("/v1/info")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["server"], "Gadgetron Storage Manager");
        assert_eq!(json["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_missing_path_lists_nothing() {
        let (_dir, router) = test_router().await;
        let (status, json) = send_json(&router, get("/v1/sessions/187/noisedata")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!([]));
    }

    #[tokio::test]
    async fn test_push_then_fetch() {
        let (_dir, router) = test_router().await;
        let data = b"\x80\x04\x95 pickled noise samples".to_vec();

        let (status, blob) = send_json(&router, upload(&data)).await;
        assert_eq!(status, StatusCode::OK);
        let id = blob["id"].as_str().unwrap().to_string();
        assert_eq!(blob["uri"], format!("/v1/blobs/{}", id));

        let (status, leaf) = send_json(
            &router,
            patch(
                "/v1/sessions/42/noiseninja",
                json!({"operation": "push", "arguments": [id]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(leaf["contents"][0]["id"], id.as_str());
        assert_eq!(leaf["path"], "sessions/42/noiseninja");
        assert_eq!(leaf["timeout"], 3 * 60 * 60);

        let (_, leaf) = send_json(&router, get("/v1/sessions/42/noiseninja")).await;
        let contents = leaf["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        let uri = contents[0]["uri"].as_str().unwrap().to_string();

        let (status, bytes) = send(&router, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, data);

        let (_, group) = send_json(&router, get("/v1/sessions/42")).await;
        assert_eq!(group, json!(["sessions/42/noiseninja"]));

        let (_, group) = send_json(&router, get("/v1/sessions/4")).await;
        assert_eq!(group, json!([]));

        let (_, group) = send_json(&router, get("/v1/sessions")).await;
        assert_eq!(group, json!(["sessions/42/noiseninja"]));
    }

    #[tokio::test]
    async fn test_range_request() {
        let (_dir, router) = test_router().await;
        let (_, blob) = send_json(&router, upload(b"0123456789")).await;
        let uri = blob["uri"].as_str().unwrap();

        let response = router
            .clone()
            .oneshot(with_header(uri, header::RANGE, "bytes=2-5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "4");

        let (status, bytes) = send(&router, with_header(uri, header::RANGE, "bytes=2-5")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(bytes, b"2345");

        let (status, bytes) = send(&router, with_header(uri, header::RANGE, "bytes=-3")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(bytes, b"789");

        let (status, bytes) = send(&router, with_header(uri, header::RANGE, "bytes=8-")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(bytes, b"89");
    }

    #[tokio::test]
    async fn test_range_outside_blob() {
        let (_dir, router) = test_router().await;
        let (_, blob) = send_json(&router, upload(b"0123456789")).await;
        let uri = blob["uri"].as_str().unwrap();

        let response = router
            .clone()
            .oneshot(with_header(uri, header::RANGE, "bytes=10-"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
    }

    #[tokio::test]
    async fn test_full_read_advertises_ranges() {
        let (_dir, router) = test_router().await;
        let (_, blob) = send_json(&router, upload(b"0123456789")).await;
        let uri = blob["uri"].as_str().unwrap();

        // Multiple ranges are not supported, so the whole blob comes back
        let response = router
            .clone()
            .oneshot(with_header(uri, header::RANGE, "bytes=0-1,4-5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
        assert_eq!(etag, format!("\"{}\"", blob["id"].as_str().unwrap()));

        let (status, bytes) = send(&router, with_header(uri, header::IF_NONE_MATCH, &etag)).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(bytes.is_empty());

        let (status, bytes) = send(&router, with_header(uri, header::IF_NONE_MATCH, "\"other\"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"0123456789");
    }

    #[tokio::test]
    async fn test_empty_upload_round_trips() {
        let (_dir, router) = test_router().await;
        let (status, blob) = send_json(&router, upload(b"")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, bytes) = send(&router, get(blob["uri"].as_str().unwrap())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_blob() {
        let (_dir, router) = test_router().await;

        let (status, _) = send(&router, get("/v1/blobs/not-a-blob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/v1/blobs/{}", BlobId::generate());
        let (status, json) = send_json(&router, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("Not found"));
    }

    #[tokio::test]
    async fn test_patch_rejects_unknown_blob() {
        let (_dir, router) = test_router().await;
        let (status, json) = send_json(
            &router,
            patch(
                "/v1/scanners/s1/noise",
                json!({"operation": "append", "arguments": [BlobId::generate()]}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("Unknown blob"));
    }

    #[tokio::test]
    async fn test_pop_and_type() {
        let (_dir, router) = test_router().await;
        let (_, a) = send_json(&router, upload(b"a")).await;
        let (_, b) = send_json(&router, upload(b"b")).await;

        send(
            &router,
            patch(
                "/v1/scanners/s1/noise",
                json!({"operation": "append", "arguments": [a["id"], b["id"]]}),
            ),
        )
        .await;
        let (status, leaf) = send_json(
            &router,
            patch(
                "/v1/scanners/s1/noise",
                json!({"operation": "pop", "type": "noise"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(leaf["contents"].as_array().unwrap().len(), 1);
        assert_eq!(leaf["contents"][0]["id"], b["id"]);
        assert_eq!(leaf["type"], "noise");
        assert_eq!(leaf["timeout"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_namespace() {
        let (_dir, router) = test_router().await;

        let (status, _) = send(&router, get("/v1/elsewhere/a/b")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &router,
            patch("/v1/elsewhere/a", json!({"operation": "pop"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_rejected() {
        let (_dir, router) = test_router().await;
        let (status, _) = send(
            &router,
            patch("/v1/debug/a", json!({"operation": "shuffle"})),
        )
        .await;
        assert!(status.is_client_error());
    }
}
