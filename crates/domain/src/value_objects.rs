use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = OffsetDateTime;

/// 直连（一对一）房间名称的保留前缀。
pub const DIRECT_ROOM_PREFIX: &str = "dm:";

const MAX_ROOM_NAME_CHARS: usize = 60;
const MAX_MESSAGE_BODY_CHARS: usize = 4000;

/// 用户唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<UserId> for Uuid {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// 房间唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl RoomId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RoomId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<RoomId> for Uuid {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

/// 房间内的消息序列号。
///
/// 每个房间从 1 开始连续递增，同时充当消息 ID 与分页游标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    pub const FIRST: Sequence = Sequence(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// 紧随其后的序列号；`None` 表示房间尚无消息。
    pub fn after(current: Option<Sequence>) -> Sequence {
        match current {
            Some(Sequence(value)) => Sequence(value + 1),
            None => Self::FIRST,
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Sequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// 经过验证的房间名称。
///
/// 普通房间名去除首尾空白后为 1..=60 个字符；
/// 直连房间名固定为 `dm:<较小的用户ID>:<较大的用户ID>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// 解析任意房间名（包括直连房间名），用于查询路径。
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.starts_with(DIRECT_ROOM_PREFIX) {
            return Self::parse_direct(&value);
        }
        Self::validate_group(value)
    }

    /// 解析普通房间名，拒绝保留前缀，用于创建房间。
    pub fn parse_group(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.starts_with(DIRECT_ROOM_PREFIX) {
            return Err(DomainError::invalid_argument(
                "room_name",
                format!("prefix `{DIRECT_ROOM_PREFIX}` is reserved"),
            ));
        }
        Self::validate_group(value)
    }

    /// 两个用户之间直连房间的规范名称，与参数顺序无关。
    pub fn direct(a: UserId, b: UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{DIRECT_ROOM_PREFIX}{low}:{high}"))
    }

    pub fn is_direct(&self) -> bool {
        self.0.starts_with(DIRECT_ROOM_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_group(value: String) -> Result<Self, DomainError> {
        if value.is_empty() {
            return Err(DomainError::invalid_argument("room_name", "cannot be empty"));
        }
        if value.chars().count() > MAX_ROOM_NAME_CHARS {
            return Err(DomainError::invalid_argument("room_name", "too long"));
        }
        Ok(Self(value))
    }

    fn parse_direct(value: &str) -> Result<Self, DomainError> {
        let malformed = || DomainError::invalid_argument("room_name", "malformed direct room name");
        let rest = &value[DIRECT_ROOM_PREFIX.len()..];
        let (first, second) = rest.split_once(':').ok_or_else(malformed)?;
        let first = Uuid::parse_str(first).map_err(|_| malformed())?;
        let second = Uuid::parse_str(second).map_err(|_| malformed())?;
        let canonical = Self::direct(UserId(first), UserId(second));
        if canonical.0 != value {
            return Err(malformed());
        }
        Ok(canonical)
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.0
    }
}

/// 经过验证的消息正文，原样保留内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageBody(String);

impl MessageBody {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_argument("body", "cannot be empty"));
        }
        if value.chars().count() > MAX_MESSAGE_BODY_CHARS {
            return Err(DomainError::invalid_argument("body", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageBody {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageBody> for String {
    fn from(value: MessageBody) -> Self {
        value.0
    }
}
