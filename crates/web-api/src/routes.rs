use application::{
    MessageDto, MessagePageDto, RoomDto, RoomSummaryDto, SendMessageRequest, SendReceiptDto,
};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use domain::{Destination, Identity, IdentityContext, Role, RoomName, Sequence, UserId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    auth::{bearer_credential, Authenticated},
    error::ApiError,
    state::AppState,
    ws_connection::WebSocketConnection,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/dev-token", post(issue_dev_token))
        .route("/rooms", post(create_room))
        .route("/rooms/{name}/join", post(join_room))
        .route("/rooms/{name}/leave", post(leave_room))
        .route(
            "/rooms/{name}/messages",
            post(send_room_message).get(list_room_messages),
        )
        .route("/users/{user_id}/messages", post(send_direct_message))
        .route("/chat/rooms", get(list_my_rooms))
        .route("/chat/{target}/chat-list", get(get_all_messages))
        .route("/chat/{target}/room-list", get(get_all_rooms))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct DevTokenRequest {
    #[serde(default)]
    user_id: Option<Uuid>,
    nickname: String,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct DevTokenResponse {
    token: String,
    user_id: Uuid,
}

/// 开发环境签发令牌，生产部署不会挂出此能力
async fn issue_dev_token(
    State(state): State<AppState>,
    Json(payload): Json<DevTokenRequest>,
) -> Result<Json<DevTokenResponse>, ApiError> {
    if !state.dev_tokens {
        return Err(ApiError::not_found("dev tokens are disabled"));
    }

    let user_id = payload.user_id.unwrap_or_else(Uuid::new_v4);
    let identity = Identity::new(
        UserId::from(user_id),
        payload.nickname,
        payload.role.unwrap_or(Role::User),
    );
    let email = payload
        .email
        .unwrap_or_else(|| format!("{user_id}@dev.local"));
    let token = state.jwt.issue_token(&identity, &email)?;

    Ok(Json(DevTokenResponse { token, user_id }))
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    name: String,
}

async fn create_room(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomDto>), ApiError> {
    let room = state.coordinator.create_room(&ctx, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(RoomDto::from(&room))))
}

async fn join_room(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(name): Path<String>,
) -> Result<Json<RoomDto>, ApiError> {
    let room = state.coordinator.join_room(&ctx, &name).await?;
    Ok(Json(RoomDto::from(&room)))
}

async fn leave_room(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.leave_room(&ctx, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    body: String,
    #[serde(default)]
    client_message_id: Option<Uuid>,
}

async fn send_room_message(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(name): Path<String>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Response, ApiError> {
    let name = RoomName::parse(name)?;
    send(state, ctx, Destination::Room(name), payload).await
}

async fn send_direct_message(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Response, ApiError> {
    send(state, ctx, Destination::User(UserId::from(user_id)), payload).await
}

/// 新消息返回 201，命中幂等键的重试返回 200
async fn send(
    state: AppState,
    ctx: IdentityContext,
    destination: Destination,
    payload: SendMessagePayload,
) -> Result<Response, ApiError> {
    let request = SendMessageRequest {
        destination,
        body: payload.body,
        client_message_id: payload.client_message_id,
    };
    let receipt = state.coordinator.send_message(&ctx, request).await?;
    let status = if receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(SendReceiptDto::from(&receipt))).into_response())
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    after: Option<u64>,
    limit: Option<u32>,
}

async fn list_room_messages(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(name): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<MessagePageDto>, ApiError> {
    let page = state
        .coordinator
        .list_messages(&ctx, &name, params.after.map(Sequence::new), params.limit)
        .await?;
    Ok(Json(MessagePageDto::from(&page)))
}

async fn get_all_messages(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(room_name): Path<String>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let messages = state.coordinator.get_all_messages(&ctx, &room_name).await?;
    Ok(Json(messages.iter().map(MessageDto::from).collect()))
}

async fn get_all_rooms(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<RoomSummaryDto>>, ApiError> {
    let rooms = state
        .coordinator
        .get_all_rooms(&ctx, UserId::from(user_id))
        .await?;
    Ok(Json(rooms.iter().map(RoomSummaryDto::from).collect()))
}

async fn list_my_rooms(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
) -> Result<Json<Vec<RoomSummaryDto>>, ApiError> {
    let user_id = ctx.require()?.id;
    let rooms = state.coordinator.get_all_rooms(&ctx, user_id).await?;
    Ok(Json(rooms.iter().map(RoomSummaryDto::from).collect()))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// 浏览器无法为 WebSocket 设置请求头，因此也接受 `?token=`
async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Result<Response, ApiError> {
    let credential = bearer_credential(&headers).or(params.token.as_deref());
    let ctx = state.coordinator.authenticate(credential).await?;
    let user_id = ctx.require()?.id;

    Ok(ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(state, ctx, user_id).run(socket).await;
    }))
}
