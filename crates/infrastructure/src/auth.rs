//! JWT 认证器
//!
//! HS256 签名的访问令牌：签发供开发与测试使用，校验结果映射为认证错误。

use application::{AuthError, Authenticator};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use config::AuthConfig;
use domain::{Identity, Role, UserId};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 临时令牌的有效期（分钟）
const TEMPORARY_TOKEN_MINUTES: i64 = 5;
const BEARER_PREFIX: &str = "Bearer ";

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// 登录邮箱
    pub sub: String,
    pub user_id: Uuid,
    pub nickname: String,
    /// 角色：`USER` 或 `ADMIN`
    pub auth: Role,
    pub iat: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity::new(UserId::from(claims.user_id), claims.nickname, claims.auth)
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
}

impl JwtAuthenticator {
    pub fn new(secret: &str, token_ttl_minutes: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            token_ttl: Duration::minutes(token_ttl_minutes),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_minutes)
    }

    /// 签发访问令牌
    pub fn issue_token(&self, identity: &Identity, email: &str) -> Result<String, AuthError> {
        self.issue(identity, email, self.token_ttl)
    }

    /// 签发 5 分钟有效的临时令牌
    pub fn issue_temporary_token(
        &self,
        identity: &Identity,
        email: &str,
    ) -> Result<String, AuthError> {
        self.issue(identity, email, Duration::minutes(TEMPORARY_TOKEN_MINUTES))
    }

    /// 验证并解析 JWT token，允许带 `Bearer ` 前缀
    pub fn verify(&self, credential: &str) -> Result<Claims, AuthError> {
        let credential = credential.trim_start();
        let token = credential
            .strip_prefix(BEARER_PREFIX)
            .unwrap_or(credential)
            .trim();
        if token.is_empty() {
            return Err(AuthError::Unauthenticated);
        }

        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::malformed(err.to_string()),
            })
    }

    fn issue(&self, identity: &Identity, email: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: email.to_string(),
            user_id: Uuid::from(identity.id),
            nickname: identity.display_name.clone(),
            auth: identity.role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AuthError::malformed(format!("token generation failed: {err}")))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        self.verify(credential).map(Identity::from)
    }
}
