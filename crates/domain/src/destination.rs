use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::DomainError,
    value_objects::{RoomId, RoomName, UserId},
};

/// 消息的逻辑目标：命名房间或用户私聊通道。
///
/// JSON 形式为 `{"room": "general"}` 或 `{"user": "<uuid>"}`，
/// 文本形式为 `room:general` 或 `user:<uuid>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Room(RoomName),
    User(UserId),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Room(name) => write!(f, "room:{name}"),
            Destination::User(user_id) => write!(f, "user:{user_id}"),
        }
    }
}

impl FromStr for Destination {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, target) = value
            .split_once(':')
            .ok_or_else(|| DomainError::invalid_argument("destination", "expected `kind:target`"))?;
        match kind {
            "room" => Ok(Destination::Room(RoomName::parse(target)?)),
            "user" => Uuid::parse_str(target.trim())
                .map(|id| Destination::User(UserId::from(id)))
                .map_err(|_| DomainError::invalid_argument("destination", "invalid user id")),
            other => Err(DomainError::invalid_argument(
                "destination",
                format!("unknown destination kind `{other}`"),
            )),
        }
    }
}

/// 订阅中心的投递键：房间通道或用户通道。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Channel {
    Room(RoomId),
    User(UserId),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Room(room_id) => write!(f, "room:{room_id}"),
            Channel::User(user_id) => write!(f, "user:{user_id}"),
        }
    }
}
