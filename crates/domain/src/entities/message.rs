use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{MessageBody, RoomId, Sequence, Timestamp, UserId};

/// 已持久化的消息，创建后不可变。
///
/// `id` 是房间内的序列号，由消息存储在追加时分配。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Sequence,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// 私聊消息的接收者；房间消息为空
    pub receiver_id: Option<UserId>,
    pub body: MessageBody,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: Timestamp,
    /// 客户端提供的幂等键
    pub client_message_id: Option<Uuid>,
}

/// 待追加的消息，尚未分配序列号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub body: MessageBody,
    pub sent_at: Timestamp,
    pub client_message_id: Option<Uuid>,
}

impl NewMessage {
    pub fn into_message(self, id: Sequence) -> Message {
        Message {
            id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            sent_at: self.sent_at,
            client_message_id: self.client_message_id,
        }
    }
}
