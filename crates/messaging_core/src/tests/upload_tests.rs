use super::*;
use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Multipart, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderName, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use shared::{
    domain::{Message, MessageId, Participant, UserId},
    protocol::SendMessageRequest,
};
use tokio::{net::TcpListener, sync::Mutex};

use crate::{session::StaticSession, ClientSettings, MessagingClient};

#[derive(Debug, Clone)]
struct UploadHit {
    endpoint: String,
    field: String,
    file_name: Option<String>,
    size: usize,
    content_type: Option<String>,
    authorization: Option<String>,
}

#[derive(Clone)]
struct UploadServer {
    responses: Arc<HashMap<&'static str, (StatusCode, Value)>>,
    hits: Arc<Mutex<Vec<UploadHit>>>,
}

async fn handle_upload(
    State(server): State<UploadServer>,
    uri: Uri,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let hit = UploadHit {
            endpoint: uri.path().to_string(),
            field: field.name().unwrap_or_default().to_string(),
            file_name: field.file_name().map(str::to_string),
            size: 0,
            content_type: header(CONTENT_TYPE),
            authorization: header(AUTHORIZATION),
        };
        let bytes = field.bytes().await.expect("field bytes");
        server.hits.lock().await.push(UploadHit {
            size: bytes.len(),
            ..hit
        });
    }

    let (status, body) = server
        .responses
        .get(uri.path())
        .cloned()
        .unwrap_or((StatusCode::NOT_FOUND, json!({ "error": "no such route" })));
    (status, Json(body)).into_response()
}

async fn handle_send(Json(body): Json<SendMessageRequest>) -> Json<Message> {
    Json(Message {
        id: MessageId::from("m1"),
        conversation_id: body.conversation_id,
        sender: Participant {
            id: UserId::from("u1"),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            avatar: None,
        },
        content: body.content,
        attachments: body.attachments,
        read_by: Default::default(),
        is_deleted: false,
        created_at: Utc::now(),
        updated_at: None,
    })
}

async fn handle_thread() -> Json<Vec<Message>> {
    Json(Vec::new())
}

async fn spawn_upload_server(
    responses: Vec<(&'static str, StatusCode, Value)>,
) -> (String, Arc<Mutex<Vec<UploadHit>>>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(Mutex::new(Vec::new()));
    let server = UploadServer {
        responses: Arc::new(
            responses
                .into_iter()
                .map(|(path, status, body)| (path, (status, body)))
                .collect(),
        ),
        hits: Arc::clone(&hits),
    };
    let app = Router::new()
        .route("/api/files", post(handle_upload))
        .route("/api/upload", post(handle_upload))
        .route("/api/messages/messages", post(handle_send))
        .route(
            "/api/messages/conversations/:id/messages",
            get(handle_thread),
        )
        .with_state(server);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), hits)
}

fn uploader_for(server_url: &str, endpoints: &[&str]) -> AttachmentUploader {
    let api = ApiClient::new(
        reqwest::Client::new(),
        server_url,
        Arc::new(StaticSession::new("u1", "token-u1")),
    );
    AttachmentUploader::new(api, endpoints.iter().map(|e| e.to_string()).collect())
}

fn png() -> UploadFile {
    UploadFile::new("x.png", Some("image/png".into()), vec![137, 80, 78])
}

#[test]
fn root_relative_paths_get_the_api_base() {
    assert_eq!(
        absolute_url("https://crm.example/", "/uploads/x.png"),
        "https://crm.example/uploads/x.png"
    );
    assert_eq!(
        absolute_url("https://crm.example", "https://cdn/x.png"),
        "https://cdn/x.png"
    );
    assert_eq!(
        absolute_url("https://crm.example", "//cdn.example/x.png"),
        "//cdn.example/x.png"
    );
}

#[test]
fn endpoints_resolve_against_api_base() {
    assert_eq!(
        resolve_endpoint("http://a.example", "/api/files"),
        "http://a.example/api/files"
    );
    assert_eq!(
        resolve_endpoint("http://a.example/", "api/upload"),
        "http://a.example/api/upload"
    );
    assert_eq!(
        resolve_endpoint("http://a.example", "https://files.example/put"),
        "https://files.example/put"
    );
}

#[tokio::test]
async fn falls_back_to_next_endpoint_and_absolutizes_path() {
    let (server_url, hits) = spawn_upload_server(vec![
        (
            "/api/files",
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "disk full" }),
        ),
        ("/api/upload", StatusCode::OK, json!({ "path": "/uploads/x.png" })),
    ])
    .await;
    let uploader = uploader_for(&server_url, &["/api/files", "/api/upload"]);

    let attachment = uploader.upload(&png()).await.expect("upload");

    assert_eq!(attachment.url, format!("{server_url}/uploads/x.png"));
    assert_eq!(attachment.name, "x.png");
    assert_eq!(attachment.mime_type.as_deref(), Some("image/png"));
    assert_eq!(attachment.size, Some(3));

    let hits = hits.lock().await;
    let endpoints: Vec<_> = hits.iter().map(|hit| hit.endpoint.as_str()).collect();
    assert_eq!(endpoints, ["/api/files", "/api/upload"]);
    for hit in hits.iter() {
        assert_eq!(hit.field, "file");
        assert_eq!(hit.file_name.as_deref(), Some("x.png"));
        assert_eq!(hit.size, 3);
        assert!(hit
            .content_type
            .as_deref()
            .is_some_and(|value| value.starts_with("multipart/form-data; boundary=")));
        assert_eq!(hit.authorization.as_deref(), Some("Bearer token-u1"));
    }
}

#[tokio::test]
async fn absolute_url_and_server_metadata_are_kept() {
    let (server_url, hits) = spawn_upload_server(vec![(
        "/api/files",
        StatusCode::OK,
        json!({
            "url": "https://cdn/x.png",
            "name": "stored.webp",
            "type": "image/webp",
            "size": 99
        }),
    )])
    .await;
    let uploader = uploader_for(&server_url, &["/api/files", "/api/upload"]);

    let attachment = uploader.upload(&png()).await.expect("upload");

    assert_eq!(attachment.url, "https://cdn/x.png");
    assert_eq!(attachment.name, "stored.webp");
    assert_eq!(attachment.mime_type.as_deref(), Some("image/webp"));
    assert_eq!(attachment.size, Some(99));
    assert_eq!(hits.lock().await.len(), 1);
}

#[tokio::test]
async fn response_without_location_moves_to_next_candidate() {
    let (server_url, _hits) = spawn_upload_server(vec![
        ("/api/files", StatusCode::OK, json!({ "ok": true })),
        ("/api/upload", StatusCode::OK, json!({ "url": "https://cdn/y.png" })),
    ])
    .await;
    let uploader = uploader_for(&server_url, &["/api/files", "/api/upload"]);

    let attachment = uploader.upload(&png()).await.expect("upload");
    assert_eq!(attachment.url, "https://cdn/y.png");
}

#[tokio::test]
async fn exhausted_candidates_raise_the_last_error() {
    let (server_url, _hits) = spawn_upload_server(vec![
        (
            "/api/files",
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "disk full" }),
        ),
        (
            "/api/upload",
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "message": "upload offline" }),
        ),
    ])
    .await;
    let uploader = uploader_for(&server_url, &["/api/files", "/api/upload"]);

    let err = uploader.upload(&png()).await.expect_err("all candidates fail");
    assert!(matches!(
        err,
        SyncError::Server { status: 503, ref message } if message == "upload offline"
    ));
}

#[tokio::test]
async fn no_candidates_yields_generic_failure() {
    let uploader = uploader_for("http://127.0.0.1:9", &[]);

    let err = uploader.upload(&png()).await.expect_err("nothing to try");
    assert!(matches!(err, SyncError::UploadFailed { attempts: 0 }));
    assert_eq!(err.to_string(), "file upload failed after 0 attempt(s)");
}

#[tokio::test]
async fn send_with_uploads_attaches_uploaded_files() {
    let (server_url, hits) = spawn_upload_server(vec![(
        "/api/files",
        StatusCode::OK,
        json!({ "path": "/uploads/x.png" }),
    )])
    .await;
    let client = MessagingClient::new(
        ClientSettings::with_api_base(&server_url),
        Arc::new(StaticSession::new("u1", "token-u1")),
    )
    .expect("client");
    client.select_conversation("c1".into()).await.expect("select");

    let sent = client
        .send_with_uploads("", &[png()])
        .await
        .expect("send")
        .expect("message");

    assert_eq!(sent.content, "");
    assert_eq!(sent.attachments.len(), 1);
    assert_eq!(sent.attachments[0].url, format!("{server_url}/uploads/x.png"));
    assert_eq!(client.selected_thread().await, vec![sent]);
    assert_eq!(hits.lock().await.len(), 1);
}
