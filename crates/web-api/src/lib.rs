//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的账户服务与实时推送中心。

mod auth;
mod error;
mod extract;
mod routes;
mod state;
mod websocket;
mod ws_connection;

pub use auth::{AdminUser, AuthenticatedUser, BearerToken};
pub use error::{ApiError, ErrorBody};
pub use extract::ApiResponse;
pub use routes::router;
pub use state::AppState;
