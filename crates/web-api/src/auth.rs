//! 请求认证
//!
//! 从 `Authorization` 头取出 bearer 凭证，交给协调器换成请求上下文。

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use domain::IdentityContext;

use crate::{error::ApiError, state::AppState};

/// 已认证请求的上下文提取器，缺少或无效凭证时直接返回 401
pub struct Authenticated(pub IdentityContext);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credential = bearer_credential(&parts.headers);
        let ctx = state.coordinator.authenticate(credential).await?;
        Ok(Self(ctx))
    }
}

/// 原样取出 `Authorization` 头，`Bearer ` 前缀由认证器处理
pub fn bearer_credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
}
