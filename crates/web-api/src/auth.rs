//! Bearer 令牌提取与调用者身份

use application::TokenClaims;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use domain::{AccountId, Actor};

use crate::{error::ApiError, state::AppState};

/// 原始 bearer 令牌，不做校验
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        Ok(Self(token.to_string()))
    }
}

/// 已通过校验的账户调用者
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: TokenClaims,
    pub actor: Actor,
}

impl AuthenticatedUser {
    pub fn account_id(&self) -> AccountId {
        self.actor.account_id
    }
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let claims = state.credential_service.authenticate(&token)?;

        // 实时通道令牌不携带账户 ID，不能访问账户接口
        let (Some(user_id), Some(role)) = (claims.user_id, claims.role.clone()) else {
            return Err(ApiError::from(application::ApplicationError::invalid_token(
                "token is not bound to an account",
            )));
        };

        let actor = Actor {
            account_id: AccountId(user_id),
            role,
            branch_id: claims.branch_id,
        };
        Ok(Self { claims, actor })
    }
}

/// 要求管理员角色
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.actor.is_admin() {
            tracing::warn!(account_id = %user.account_id(), "admin endpoint denied");
            return Err(ApiError::forbidden("admin role required"));
        }
        Ok(Self(user))
    }
}
