use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use shared::{domain::UserId, error::ErrorCode};
use tokio::{net::TcpListener, sync::Mutex};

use super::*;
use crate::test_support::{group, message, user};

#[derive(Clone, Default)]
struct ServerState {
    seen_auth: Arc<Mutex<Vec<Option<String>>>>,
    group_fields: Arc<Mutex<Vec<(String, String)>>>,
    deleted: Arc<Mutex<Vec<(i64, i64)>>>,
}

async fn handle_login(Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    if body["password"] == "correct" {
        Ok(Json(json!({ "token": "issued-token" })))
    } else if body["username"] == "crash" {
        Err(StatusCode::INTERNAL_SERVER_ERROR)
    } else {
        Err(StatusCode::BAD_REQUEST)
    }
}

async fn handle_update(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path((conversation_id, message_id)): Path<(i64, i64)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.seen_auth.lock().await.push(
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    );
    if message_id == 404 {
        return Err(StatusCode::NOT_FOUND);
    }
    let content = body["content"].as_str().unwrap_or_default();
    if content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let record = message(message_id, conversation_id, 1, content);
    Ok(Json(serde_json::to_value(record).expect("record")))
}

async fn handle_delete(
    State(state): State<ServerState>,
    Path((conversation_id, message_id)): Path<(i64, i64)>,
) -> StatusCode {
    state
        .deleted
        .lock()
        .await
        .push((conversation_id, message_id));
    StatusCode::OK
}

async fn handle_create_group(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut name = String::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let field_name = field.name().unwrap_or_default().to_string();
        let value = if field_name == "groupPhoto" {
            format!("{} bytes", field.bytes().await.map(|b| b.len()).unwrap_or(0))
        } else {
            field.text().await.unwrap_or_default()
        };
        if field_name == "name" {
            name = value.clone();
        }
        state.group_fields.lock().await.push((field_name, value));
    }
    let created = group(42, &name, vec![user(1, "alice"), user(2, "bob"), user(3, "carol")]);
    (
        StatusCode::CREATED,
        Json(json!({ "newGroup": serde_json::to_value(created).expect("group") })),
    )
}

async fn handle_chats(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    if headers.get("authorization").is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!([
        serde_json::to_value(group(5, "team", vec![user(1, "alice")])).expect("group")
    ])))
}

async fn spawn_gateway_server() -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState::default();
    let app = Router::new()
        .route("/users/login", post(handle_login))
        .route(
            "/messages/:conversation_id/:message_id",
            put(handle_update).delete(handle_delete),
        )
        .route("/groups/createGroup", post(handle_create_group))
        .route("/chats", get(handle_chats))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn login_returns_token_and_surfaces_bad_request_status() {
    let (server_url, _state) = spawn_gateway_server().await;
    let gateway = HttpGateway::new(server_url);

    let token = gateway.login("alice", "correct").await.expect("login");
    assert_eq!(token, "issued-token");

    let err = gateway.login("alice", "wrong").await.expect_err("rejected");
    assert_eq!(err.status, Some(400));

    let err = gateway.login("crash", "wrong").await.expect_err("server error");
    assert_eq!(err.status, Some(500));
}

#[tokio::test]
async fn update_message_returns_canonical_record_and_sends_bearer() {
    let (server_url, state) = spawn_gateway_server().await;
    let gateway = HttpGateway::new(format!("{server_url}/"));
    gateway.set_bearer(Some("tok".to_string())).await;

    let record = gateway
        .update_message(ConversationId(9), MessageId(4), "hello there")
        .await
        .expect("update");
    assert_eq!(record.id, MessageId(4));
    assert_eq!(record.conversation_id, ConversationId(9));
    assert_eq!(record.content, "hello there");
    assert_eq!(
        state.seen_auth.lock().await.as_slice(),
        &[Some("Bearer tok".to_string())]
    );

    let err = gateway
        .update_message(ConversationId(9), MessageId(404), "x")
        .await
        .expect_err("missing");
    assert_eq!(err.status, Some(404));
    assert_eq!(err.code(), Some(ErrorCode::NotFound));

    let err = gateway
        .update_message(ConversationId(9), MessageId(4), " ")
        .await
        .expect_err("blank");
    assert_eq!(err.status, Some(400));
    assert_eq!(err.code(), Some(ErrorCode::Validation));
}

#[tokio::test]
async fn delete_message_targets_conversation_and_message() {
    let (server_url, state) = spawn_gateway_server().await;
    let gateway = HttpGateway::new(server_url);

    gateway
        .delete_message(ConversationId(9), MessageId(4))
        .await
        .expect("delete");
    assert_eq!(state.deleted.lock().await.as_slice(), &[(9, 4)]);
}

#[tokio::test]
async fn create_group_posts_multipart_form_with_optional_photo() {
    let (server_url, state) = spawn_gateway_server().await;
    let gateway = HttpGateway::new(server_url);

    let conversation = gateway
        .create_group(CreateGroupRequest {
            members: vec![user(1, "alice"), user(2, "bob"), user(3, "carol")],
            name: "alice, bob & carol".to_string(),
            photo: Some(PhotoAttachment {
                filename: "icon.png".to_string(),
                mime_type: Some("image/png".to_string()),
                bytes: vec![1, 2, 3],
            }),
        })
        .await
        .expect("create group");

    assert_eq!(conversation.id, ConversationId(42));
    assert_eq!(conversation.name, "alice, bob & carol");

    let fields = state.group_fields.lock().await.clone();
    let members_field = fields
        .iter()
        .find(|(name, _)| name == "members")
        .map(|(_, value)| value.clone())
        .expect("members field");
    let members: Vec<UserRecord> = serde_json::from_str(&members_field).expect("members json");
    assert_eq!(
        members.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![UserId(1), UserId(2), UserId(3)]
    );
    assert!(fields.contains(&("groupPhoto".to_string(), "3 bytes".to_string())));
}

#[tokio::test]
async fn list_conversations_requires_bearer() {
    let (server_url, _state) = spawn_gateway_server().await;
    let gateway = HttpGateway::new(server_url);

    let err = gateway.list_conversations().await.expect_err("unauthorized");
    assert_eq!(err.status, Some(401));

    gateway.set_bearer(Some("tok".to_string())).await;
    let conversations = gateway.list_conversations().await.expect("list");
    assert_eq!(conversations.len(), 1);
    assert!(conversations[0].is_group());
}
