//! 已验证的发送者身份
//!
//! 身份由外部认证器产生，随每个请求显式传递，不存在全局会话状态。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{errors::DomainError, value_objects::UserId};

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            other => Err(DomainError::invalid_argument(
                "role",
                format!("unknown role `{other}`"),
            )),
        }
    }
}

/// 已验证身份，会话期间不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
}

impl Identity {
    pub fn new(id: UserId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
        }
    }

    /// 本人或管理员可以代表 `user_id` 查询数据
    pub fn can_act_for(&self, user_id: UserId) -> bool {
        self.id == user_id || self.role.is_admin()
    }
}

/// 请求上下文中的身份。
///
/// 由传输层在认证后构造，并以引用形式传入每一次协调器调用。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityContext {
    identity: Option<Identity>,
}

impl IdentityContext {
    pub fn anonymous() -> Self {
        Self { identity: None }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// 取出已验证身份，匿名上下文返回 `Unauthenticated`
    pub fn require(&self) -> Result<&Identity, DomainError> {
        self.identity.as_ref().ok_or(DomainError::Unauthenticated)
    }
}
