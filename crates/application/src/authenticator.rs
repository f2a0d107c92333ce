use async_trait::async_trait;
use domain::Identity;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("credential missing")]
    Unauthenticated,
    #[error("credential expired")]
    Expired,
    #[error("credential malformed: {0}")]
    Malformed(String),
}

impl AuthError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// 外部认证能力：把 bearer 凭证换成已验证身份。
///
/// 核心逻辑从不检查凭证内部结构，只消费认证结果。
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}
