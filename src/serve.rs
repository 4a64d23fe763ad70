use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower::ServiceExt;
use tower::service_fn;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use crate::export::{export_json, export_outline, import_json};
use crate::interaction::{EditTarget, Editor, InputEvent};
use crate::model::{Group, GroupPatch, Node, NodePatch};
use crate::references::{
    ReferenceClient, ReferenceConfig, ReferenceError, ReferenceRequest, ReferenceResponse,
};
use crate::render::{RenderOptions, render_svg};
use crate::utils::decode_data_uri;
use crate::storage::Storage;
use crate::viewport::{Viewport, ViewportConfig};

/// Arguments for running the mindcanvas web server
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mindcanvas serve",
    about = "Start the mindcanvas headless editor API server."
)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 5151)]
    pub port: u16,

    /// SQLite database holding the document (defaults to MINDCANVAS_DB_PATH
    /// or the platform data directory).
    #[arg(long = "db", conflicts_with = "file")]
    pub db: Option<PathBuf>,

    /// Mirror the document to a plain JSON file instead of SQLite.
    #[arg(long = "file")]
    pub file: Option<PathBuf>,

    /// Directory with a built web UI to serve alongside the API.
    #[arg(long = "ui")]
    pub ui: Option<PathBuf>,

    /// Default Gemini API key for reference suggestions (falls back to
    /// GEMINI_API_KEY).
    #[arg(long = "api-key")]
    pub api_key: Option<String>,

    /// Background color for rendered SVG views.
    #[arg(long = "background-color", default_value = "white")]
    pub background_color: String,
}

pub struct ServeState {
    editor: RwLock<Editor>,
    storage: Storage,
    references: ReferenceClient,
    background: String,
}

impl ServeState {
    pub async fn new(storage: Storage, references: ReferenceClient, background: String) -> Self {
        let document = storage.load_document().await;
        log::info!(
            "loaded document with {} nodes and {} groups",
            document.nodes.len(),
            document.groups.len()
        );
        Self {
            editor: RwLock::new(Editor::new(document, ViewportConfig::default())),
            storage,
            references,
            background,
        }
    }

    /// Runs `apply` against the editor and mirrors the document to storage
    /// when it reports a change. The write lock is held across the save so
    /// stored snapshots follow mutation order.
    async fn mutate<T>(&self, apply: impl FnOnce(&mut Editor) -> (T, bool)) -> Result<T> {
        let mut editor = self.editor.write().await;
        let (value, changed) = apply(&mut editor);
        if changed {
            self.storage.save_store(editor.store()).await?;
        }
        Ok(value)
    }

    async fn snapshot(&self) -> DocumentPayload {
        let editor = self.editor.read().await;
        DocumentPayload::from_editor(&editor)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentPayload {
    nodes: Vec<Node>,
    groups: Vec<Group>,
    selection: Vec<String>,
    viewport: Viewport,
    #[serde(skip_serializing_if = "Option::is_none")]
    editing: Option<EditTarget>,
}

impl DocumentPayload {
    fn from_editor(editor: &Editor) -> Self {
        let store = editor.store();
        Self {
            nodes: store.nodes().to_vec(),
            groups: store.groups().to_vec(),
            selection: store.selection().to_vec(),
            viewport: *editor.viewport(),
            editing: editor.editing().cloned(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AddNodeRequest {
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeImageUpdateRequest {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Serialize)]
struct SelectionPayload {
    selection: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EventOutcome {
    changed: bool,
}

#[derive(Debug, Deserialize)]
struct RenderQuery {
    width: Option<f64>,
    height: Option<f64>,
}

pub fn router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/api/document", get(get_document).put(put_document))
        .route("/api/nodes", post(post_node))
        .route("/api/nodes/:id", patch(patch_node).delete(delete_node))
        .route("/api/nodes/:id/image", get(get_node_image).put(put_node_image))
        .route("/api/selection", delete(delete_selection))
        .route("/api/selection/:id", post(post_selection))
        .route("/api/groups", post(post_group))
        .route("/api/groups/:id", patch(patch_group).delete(delete_group))
        .route("/api/events", post(post_event))
        .route("/api/viewport/:action", post(post_viewport))
        .route("/api/export/outline", get(get_outline))
        .route("/api/export/json", get(get_json))
        .route("/api/render/svg", get(get_svg))
        .route("/api/generate-references", post(post_references))
        .with_state(state)
}

pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let storage = Storage::open(args.db.clone(), args.file.clone()).await?;
    log::info!("mirroring document to {}", storage.location().display());

    let mut reference_config = ReferenceConfig::default();
    if args.api_key.is_some() {
        reference_config.api_key = args.api_key.clone();
    }
    if reference_config.api_key.is_none() {
        log::warn!("no default Gemini API key configured; requests must supply their own");
    }

    let state = Arc::new(
        ServeState::new(
            storage,
            ReferenceClient::new(reference_config),
            args.background_color.clone(),
        )
        .await,
    );

    let mut app = router(state);

    if let Some(root) = &args.ui {
        let static_dir = ServeDir::new(root.clone())
            .append_index_html_on_directories(true)
            .fallback(ServeFile::new(root.join("index.html")));

        let static_service = service_fn(move |req| {
            let svc = static_dir.clone();
            async move {
                match svc.oneshot(req).await {
                    Ok(response) => Ok(response.map(axum::body::Body::new)),
                    Err(error) => {
                        let message = format!("Static file error: {error}");
                        Ok((StatusCode::INTERNAL_SERVER_ERROR, message).into_response())
                    }
                }
            }
        });

        app = app.fallback_service(static_service);
    }

    let app = app.layer(CorsLayer::permissive());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {addr}"))?;

    println!("mindcanvas server listening on http://{addr}");
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

fn internal_error(err: anyhow::Error) -> (StatusCode, String) {
    log::error!("request failed: {err:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn not_found(kind: &str, id: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{kind} '{id}' not found"))
}

async fn get_document(State(state): State<Arc<ServeState>>) -> Json<DocumentPayload> {
    Json(state.snapshot().await)
}

/// Destructive import of exported JSON text. Malformed text leaves an empty
/// document behind, matching the file-import behavior.
async fn put_document(
    State(state): State<Arc<ServeState>>,
    body: String,
) -> Result<Json<DocumentPayload>, (StatusCode, String)> {
    let document = import_json(&body);
    let payload = state
        .mutate(|editor| {
            editor.import(document);
            (DocumentPayload::from_editor(editor), true)
        })
        .await
        .map_err(internal_error)?;
    Ok(Json(payload))
}

async fn post_node(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<AddNodeRequest>,
) -> Result<(StatusCode, Json<Node>), (StatusCode, String)> {
    let node = state
        .mutate(|editor| {
            let node = editor.store_mut().add_node(request.parent_id.as_deref()).clone();
            (node, true)
        })
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn patch_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
    Json(patch): Json<NodePatch>,
) -> Result<StatusCode, (StatusCode, String)> {
    let updated = state
        .mutate(|editor| {
            let updated = editor.store_mut().update_node(&node_id, patch);
            (updated, updated)
        })
        .await
        .map_err(internal_error)?;
    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("node", &node_id))
    }
}

async fn delete_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let removed = state
        .mutate(|editor| {
            let removed = editor.delete_node(&node_id);
            (removed, removed)
        })
        .await
        .map_err(internal_error)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("node", &node_id))
    }
}

async fn put_node_image(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
    Json(payload): Json<NodeImageUpdateRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let NodeImageUpdateRequest { mime_type, data } = payload;

    if data.is_none() && mime_type.is_none() {
        let cleared = state
            .mutate(|editor| {
                let cleared = editor.store_mut().clear_image(&node_id);
                (cleared, cleared)
            })
            .await
            .map_err(internal_error)?;
        return if cleared {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(not_found("node", &node_id))
        };
    }

    let mime_type = mime_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "mimeType is required when providing image data".to_string(),
            )
        })?
        .to_string();

    let data_str = data
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "image payload cannot be empty".to_string(),
            )
        })?;

    let bytes = BASE64_STANDARD.decode(data_str.as_bytes()).map_err(|err| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid base64 payload: {err}"),
        )
    })?;

    let outcome = state
        .mutate(|editor| match editor.attach_image(&node_id, &mime_type, &bytes) {
            Ok(attached) => (Ok(attached), attached),
            Err(err) => (Err(err), false),
        })
        .await
        .map_err(internal_error)?;

    match outcome {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found("node", &node_id)),
        Err(err) => Err((StatusCode::BAD_REQUEST, format!("{err:#}"))),
    }
}

async fn get_node_image(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
) -> Result<Response, (StatusCode, String)> {
    let editor = state.editor.read().await;
    let node = editor
        .store()
        .node(&node_id)
        .ok_or_else(|| not_found("node", &node_id))?;
    let uri = node.image.as_deref().ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("node '{node_id}' has no image"),
        )
    })?;

    let (mime_type, bytes) = decode_data_uri(uri).map_err(internal_error)?;
    let content_type = HeaderValue::from_str(&mime_type)
        .map_err(|err| internal_error(anyhow::Error::new(err)))?;

    let mut response = Response::new(bytes.into());
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    Ok(response)
}

async fn delete_selection(State(state): State<Arc<ServeState>>) -> StatusCode {
    state.editor.write().await.store_mut().clear_selection();
    StatusCode::NO_CONTENT
}

async fn post_selection(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
) -> Json<SelectionPayload> {
    let mut editor = state.editor.write().await;
    editor.store_mut().toggle_selection(&node_id);
    Json(SelectionPayload {
        selection: editor.store().selection().to_vec(),
    })
}

async fn post_group(
    State(state): State<Arc<ServeState>>,
) -> Result<(StatusCode, Json<Group>), (StatusCode, String)> {
    let group = state
        .mutate(|editor| {
            let group = editor.store_mut().create_group().cloned();
            let changed = group.is_some();
            (group, changed)
        })
        .await
        .map_err(internal_error)?;
    match group {
        Some(group) => Ok((StatusCode::CREATED, Json(group))),
        None => Err((
            StatusCode::BAD_REQUEST,
            "select at least two nodes to create a group".to_string(),
        )),
    }
}

async fn patch_group(
    State(state): State<Arc<ServeState>>,
    AxumPath(group_id): AxumPath<String>,
    Json(patch): Json<GroupPatch>,
) -> Result<StatusCode, (StatusCode, String)> {
    let updated = state
        .mutate(|editor| {
            let updated = editor.store_mut().update_group(&group_id, patch);
            (updated, updated)
        })
        .await
        .map_err(internal_error)?;
    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("group", &group_id))
    }
}

async fn delete_group(
    State(state): State<Arc<ServeState>>,
    AxumPath(group_id): AxumPath<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let removed = state
        .mutate(|editor| {
            let removed = editor.store_mut().delete_group(&group_id);
            (removed, removed)
        })
        .await
        .map_err(internal_error)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("group", &group_id))
    }
}

async fn post_event(
    State(state): State<Arc<ServeState>>,
    Json(event): Json<InputEvent>,
) -> Result<Json<EventOutcome>, (StatusCode, String)> {
    let changed = state
        .mutate(|editor| {
            let changed = editor.handle(event);
            (changed, changed)
        })
        .await
        .map_err(internal_error)?;
    Ok(Json(EventOutcome { changed }))
}

/// Toolbar controls: `zoom-in`, `zoom-out` or `reset`.
async fn post_viewport(
    State(state): State<Arc<ServeState>>,
    AxumPath(action): AxumPath<String>,
) -> Result<Json<Viewport>, (StatusCode, String)> {
    let mut editor = state.editor.write().await;
    let viewport = editor.viewport_mut();
    match action.as_str() {
        "zoom-in" => viewport.zoom_in(),
        "zoom-out" => viewport.zoom_out(),
        "reset" => viewport.reset(),
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown viewport action '{other}'"),
            ));
        }
    }
    Ok(Json(*viewport))
}

fn attachment(content_type: &'static str, filename: &'static str, body: String) -> Response {
    let mut response = Response::new(body.into());
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(filename),
    );
    response
}

async fn get_outline(State(state): State<Arc<ServeState>>) -> Response {
    let editor = state.editor.read().await;
    attachment(
        "text/plain; charset=utf-8",
        "attachment; filename=\"mindmap-outline.txt\"",
        export_outline(editor.store().nodes()),
    )
}

async fn get_json(State(state): State<Arc<ServeState>>) -> Result<Response, (StatusCode, String)> {
    let editor = state.editor.read().await;
    let json = export_json(editor.store().nodes(), editor.store().groups())
        .map_err(internal_error)?;
    Ok(attachment(
        "application/json",
        "attachment; filename=\"mindmap.json\"",
        json,
    ))
}

async fn get_svg(
    State(state): State<Arc<ServeState>>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, (StatusCode, String)> {
    let defaults = RenderOptions::default();
    let options = RenderOptions {
        width: query.width.filter(|w| *w > 0.0).unwrap_or(defaults.width),
        height: query.height.filter(|h| *h > 0.0).unwrap_or(defaults.height),
        background: state.background.clone(),
    };

    let editor = state.editor.read().await;
    let svg = render_svg(
        editor.store().document(),
        editor.store().selection(),
        editor.viewport(),
        &options,
    )
    .map_err(internal_error)?;

    let mut response = Response::new(svg.into());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("image/svg+xml"),
    );
    Ok(response)
}

async fn post_references(
    State(state): State<Arc<ServeState>>,
    payload: Result<Json<ReferenceRequest>, JsonRejection>,
) -> Result<Json<ReferenceResponse>, ReferenceError> {
    let Json(request) = payload.map_err(|rejection| {
        log::warn!("rejected reference request body: {rejection}");
        ReferenceError::InvalidBody(rejection.body_text())
    })?;
    let text = request.text.unwrap_or_default();
    let references = state
        .references
        .suggest(&text, request.api_key.as_deref())
        .await?;
    Ok(Json(ReferenceResponse { references }))
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: String,
}

impl IntoResponse for ReferenceError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorPayload {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use crate::model::Document;
    use crate::references::DEFAULT_MODEL;
    use crate::storage::FileStorage;

    struct Harness {
        app: Router,
        storage: Storage,
        _dir: TempDir,
    }

    async fn harness(api_key: Option<&str>, api_url: &str) -> Harness {
        let dir = TempDir::new().unwrap();
        let storage = Storage::File(FileStorage::new(dir.path().join("doc.json")));
        let references = ReferenceClient::new(ReferenceConfig {
            api_key: api_key.map(str::to_string),
            model: DEFAULT_MODEL.to_string(),
            api_url: api_url.to_string(),
        });
        let state = Arc::new(ServeState::new(storage.clone(), references, "white".into()).await);
        Harness {
            app: router(state),
            storage,
            _dir: dir,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn stored(storage: &Storage) -> Document {
        let text = storage.load().await.unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn mutations_are_mirrored_to_storage() {
        let h = harness(None, "http://127.0.0.1:9").await;

        let (status, body) = send(&h.app, "POST", "/api/nodes", Some(json!({"parentId": "1"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let child = json_body(&body);
        assert_eq!(child["x"], 600.0);
        let child_id = child["id"].as_str().unwrap().to_string();
        assert_eq!(stored(&h.storage).await.nodes.len(), 2);

        let (status, _) = send(
            &h.app,
            "PATCH",
            &format!("/api/nodes/{child_id}"),
            Some(json!({"text": "Oceans", "icon": "star"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(stored(&h.storage).await.nodes[1].text, "Oceans");

        let (status, body) = send(&h.app, "GET", "/api/export/outline", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), "- Main idea\n  - Oceans\n");

        let (status, _) = send(&h.app, "DELETE", "/api/nodes/1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(stored(&h.storage).await.nodes.is_empty());

        let (status, _) = send(&h.app, "DELETE", "/api/nodes/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn grouping_goes_through_selection() {
        let h = harness(None, "http://127.0.0.1:9").await;
        let (_, body) = send(&h.app, "POST", "/api/nodes", Some(json!({}))).await;
        let other = json_body(&body)["id"].as_str().unwrap().to_string();

        let (status, _) = send(&h.app, "POST", "/api/groups", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        send(&h.app, "POST", "/api/selection/1", None).await;
        let (_, body) = send(&h.app, "POST", &format!("/api/selection/{other}"), None).await;
        assert_eq!(json_body(&body)["selection"], json!(["1", other]));

        let (status, body) = send(&h.app, "POST", "/api/groups", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let group = json_body(&body);
        assert_eq!(group["x"], 80.0);
        assert_eq!(group["y"], 60.0);
        let group_id = group["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &h.app,
            "PATCH",
            &format!("/api/groups/{group_id}"),
            Some(json!({"name": "Cluster"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(stored(&h.storage).await.groups[0].name, "Cluster");

        let (_, body) = send(&h.app, "GET", "/api/document", None).await;
        assert_eq!(json_body(&body)["selection"], json!([]));

        let (status, _) = send(&h.app, "DELETE", &format!("/api/groups/{group_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(stored(&h.storage).await.groups.is_empty());
    }

    #[tokio::test]
    async fn import_replaces_document_and_tolerates_garbage() {
        let h = harness(None, "http://127.0.0.1:9").await;
        let exported = export_json(&Document::starter().nodes, &[]).unwrap();
        let mut imported: Document = serde_json::from_str(&exported).unwrap();
        imported.nodes[0].text = "Imported".into();
        let text = serde_json::to_string(&imported).unwrap();

        let request = Request::builder()
            .method("PUT")
            .uri("/api/document")
            .body(Body::from(text))
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stored(&h.storage).await, imported);

        let request = Request::builder()
            .method("PUT")
            .uri("/api/document")
            .body(Body::from("not json at all"))
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(stored(&h.storage).await.is_empty());
    }

    #[tokio::test]
    async fn pointer_events_drive_the_editor() {
        let h = harness(None, "http://127.0.0.1:9").await;
        let (_, body) = send(
            &h.app,
            "POST",
            "/api/events",
            Some(json!({"type": "pointerDown", "x": 410, "y": 310})),
        )
        .await;
        assert_eq!(json_body(&body)["changed"], false);

        let (_, body) = send(
            &h.app,
            "POST",
            "/api/events",
            Some(json!({"type": "pointerMove", "x": 510, "y": 360})),
        )
        .await;
        assert_eq!(json_body(&body)["changed"], true);
        send(&h.app, "POST", "/api/events", Some(json!({"type": "pointerUp"}))).await;

        let node = &stored(&h.storage).await.nodes[0];
        assert_eq!((node.x, node.y), (500.0, 350.0));

        send(&h.app, "POST", "/api/events", Some(json!({"type": "wheel", "deltaY": 1}))).await;
        let (_, body) = send(&h.app, "GET", "/api/document", None).await;
        let scale = json_body(&body)["viewport"]["scale"].as_f64().unwrap();
        assert!((scale - 0.9).abs() < 1e-12);

        let (status, body) = send(&h.app, "GET", "/api/render/svg?width=640&height=480", None).await;
        assert_eq!(status, StatusCode::OK);
        let svg = String::from_utf8(body).unwrap();
        assert!(svg.contains("width=\"640\""));
        assert!(svg.contains("scale(0.9000)"));
    }

    #[tokio::test]
    async fn image_upload_is_embedded_as_data_uri() {
        let h = harness(None, "http://127.0.0.1:9").await;
        let (status, _) = send(
            &h.app,
            "PUT",
            "/api/nodes/1/image",
            Some(json!({"mimeType": "image/png", "data": "iVBORw0KGgo="})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            stored(&h.storage).await.nodes[0].image.as_deref(),
            Some("data:image/png;base64,iVBORw0KGgo=")
        );

        let (status, _) = send(
            &h.app,
            "PUT",
            "/api/nodes/1/image",
            Some(json!({"mimeType": "image/png", "data": "%%%"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&h.app, "GET", "/api/nodes/1/image", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(b"\x89PNG"));

        let (status, _) = send(&h.app, "PUT", "/api/nodes/1/image", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(stored(&h.storage).await.nodes[0].image, None);

        let (status, _) = send(&h.app, "GET", "/api/nodes/1/image", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toolbar_zoom_and_selection_clear() {
        let h = harness(None, "http://127.0.0.1:9").await;
        let (_, body) = send(&h.app, "POST", "/api/viewport/zoom-in", None).await;
        assert!((json_body(&body)["scale"].as_f64().unwrap() - 1.1).abs() < 1e-12);
        let (_, body) = send(&h.app, "POST", "/api/viewport/reset", None).await;
        assert_eq!(json_body(&body)["scale"], 1.0);
        let (status, _) = send(&h.app, "POST", "/api/viewport/spin", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        send(&h.app, "POST", "/api/selection/1", None).await;
        let (status, _) = send(&h.app, "DELETE", "/api/selection", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(&h.app, "GET", "/api/document", None).await;
        assert_eq!(json_body(&body)["selection"], json!([]));
    }

    #[tokio::test]
    async fn reference_errors_map_to_statuses() {
        let h = harness(None, "http://127.0.0.1:9").await;

        let (status, body) =
            send(&h.app, "POST", "/api/generate-references", Some(json!({"text": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["error"], "No text provided");

        let (status, _) =
            send(&h.app, "POST", "/api/generate-references", Some(json!({"text": "Oceans"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &h.app,
            "POST",
            "/api/generate-references",
            Some(json!({"text": "Oceans", "apiKey": "caller-key"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = json_body(&body)["error"].as_str().unwrap().to_string();
        assert!(message.contains("Failed to send request to Gemini API"));
    }

    #[tokio::test]
    async fn malformed_reference_bodies_get_json_errors() {
        let h = harness(Some("server-key"), "http://127.0.0.1:9").await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/generate-references")
            .body(Body::from("text=Oceans"))
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let message = json_body(&bytes)["error"].as_str().unwrap().to_string();
        assert!(message.starts_with("Failed to generate references: "));

        let (status, body) =
            send(&h.app, "POST", "/api/generate-references", Some(json!({"text": 5}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(&body)["error"].is_string());
    }

    #[tokio::test]
    async fn server_key_stays_out_of_error_bodies() {
        let h = harness(Some("SERVER-SECRET-KEY"), "http://127.0.0.1:9").await;
        let (status, body) =
            send(&h.app, "POST", "/api/generate-references", Some(json!({"text": "Oceans"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = json_body(&body)["error"].as_str().unwrap().to_string();
        assert!(!message.contains("SERVER-SECRET-KEY"), "{message}");
    }

    #[tokio::test]
    async fn references_come_back_line_split() {
        let upstream = Router::new().fallback(|uri: axum::http::Uri, headers: axum::http::HeaderMap| async move {
            let keyed = headers
                .get("x-goog-api-key")
                .is_some_and(|key| key == "server-key");
            if !keyed || uri.query().is_some() {
                return (StatusCode::FORBIDDEN, Json(json!({"error": "bad credential"})));
            }
            (
                StatusCode::OK,
                Json(json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "Doe, J. (2020). Oceans.\n\n  Roe, R. (2018). Tides.  \n"}]}
                    }]
                })),
            )
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });

        let h = harness(Some("server-key"), &format!("http://{addr}")).await;
        let (status, body) =
            send(&h.app, "POST", "/api/generate-references", Some(json!({"text": "Oceans"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_body(&body)["references"],
            json!(["Doe, J. (2020). Oceans.", "Roe, R. (2018). Tides."])
        );
    }
}
