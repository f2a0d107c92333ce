use async_trait::async_trait;
use domain::{
    Message, NewMessage, RepositoryError, Room, RoomId, RoomName, RoomSummary, Sequence,
    Timestamp, UserId,
};

/// 历史分页参数，游标锚定在序列号上而不是偏移量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    /// 只返回序列号严格大于该值的消息
    pub after: Option<Sequence>,
    pub limit: u32,
}

/// 一页历史消息，按序列号从旧到新排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// 还有更多消息时为本页最后一条的序列号
    pub next_cursor: Option<Sequence>,
}

impl MessagePage {
    /// 由多取一条的结果构造分页
    pub fn from_overfetch(mut messages: Vec<Message>, limit: u32) -> Self {
        let limit = limit as usize;
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        let next_cursor = if has_more {
            messages.last().map(|message| message.id)
        } else {
            None
        };
        Self {
            messages,
            next_cursor,
        }
    }
}

/// 追加结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub message: Message,
    /// false 表示命中了 client_message_id 去重，返回的是已存在的消息
    pub created: bool,
}

/// 房间注册表：房间与成员关系
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    /// 创建命名房间，名称已存在时返回 `Conflict`
    async fn create_room(&self, room: Room) -> Result<Room, RepositoryError>;

    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError>;

    async fn find_by_name(&self, name: &RoomName) -> Result<Option<Room>, RepositoryError>;

    /// 按名称解析房间 ID，不存在时返回 `NotFound`，从不隐式创建
    async fn resolve(&self, name: &RoomName) -> Result<RoomId, RepositoryError> {
        self.find_by_name(name)
            .await?
            .map(|room| room.id)
            .ok_or(RepositoryError::NotFound)
    }

    /// 原子地获取或创建直连房间（按规范名称去重）
    async fn get_or_create_direct(&self, room: Room) -> Result<Room, RepositoryError>;

    /// 幂等地加入成员，返回是否新加入；房间不存在时返回 `NotFound`
    async fn ensure_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;

    /// 显式退出，返回是否确实移除
    async fn remove_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;

    async fn record_activity(
        &self,
        room_id: RoomId,
        sequence: Sequence,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;

    /// 用户所在的房间，最近活动在前，平局按房间 ID 升序
    async fn list_rooms_for(&self, user_id: UserId) -> Result<Vec<RoomSummary>, RepositoryError>;
}

/// 消息存储：每个房间一条只追加的有序日志
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 分配下一个序列号并持久化，对同一房间的并发追加是线性化的。
    ///
    /// 要么完整写入，要么什么都不写。带相同 client_message_id 的重试返回原消息。
    async fn append(&self, message: NewMessage) -> Result<AppendOutcome, RepositoryError>;

    async fn list_messages(
        &self,
        room_id: RoomId,
        query: HistoryQuery,
    ) -> Result<MessagePage, RepositoryError>;

    async fn list_all(&self, room_id: RoomId) -> Result<Vec<Message>, RepositoryError>;
}
