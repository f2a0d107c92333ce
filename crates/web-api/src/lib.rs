//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给聊天协调器。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::Authenticated;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use ws_connection::{ClientFrame, ServerFrame};
