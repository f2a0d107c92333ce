use domain::{Message, Room, RoomKind, RoomSummary, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{repository::MessagePage, services::SendReceipt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: u64,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_message_id: Option<Uuid>,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.value(),
            room_id: Uuid::from(message.room_id),
            sender_id: Uuid::from(message.sender_id),
            receiver_id: message.receiver_id.map(Uuid::from),
            body: message.body.as_str().to_owned(),
            sent_at: message.sent_at,
            client_message_id: message.client_message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDto {
    pub id: Uuid,
    pub name: String,
    pub kind: RoomKind,
    pub members: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
}

impl From<&Room> for RoomDto {
    fn from(room: &Room) -> Self {
        Self {
            id: Uuid::from(room.id),
            name: room.name.to_string(),
            kind: room.kind,
            members: room.members.iter().copied().map(Uuid::from).collect(),
            created_at: room.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummaryDto {
    pub id: Uuid,
    pub name: String,
    pub kind: RoomKind,
    pub member_count: usize,
    pub last_message_id: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: Timestamp,
}

impl From<&RoomSummary> for RoomSummaryDto {
    fn from(summary: &RoomSummary) -> Self {
        Self {
            id: Uuid::from(summary.id),
            name: summary.name.to_string(),
            kind: summary.kind,
            member_count: summary.member_count,
            last_message_id: summary.last_sequence.map(|seq| seq.value()),
            last_activity_at: summary.last_activity_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePageDto {
    pub messages: Vec<MessageDto>,
    /// 作为下一页的 `after` 参数；为空表示没有更多消息
    pub next_cursor: Option<u64>,
}

impl From<&MessagePage> for MessagePageDto {
    fn from(page: &MessagePage) -> Self {
        Self {
            messages: page.messages.iter().map(MessageDto::from).collect(),
            next_cursor: page.next_cursor.map(|seq| seq.value()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceiptDto {
    pub message: MessageDto,
    pub delivered: usize,
    pub missed: usize,
    /// 命中幂等键，返回的是之前已持久化的消息
    pub duplicate: bool,
}

impl From<&SendReceipt> for SendReceiptDto {
    fn from(receipt: &SendReceipt) -> Self {
        Self {
            message: MessageDto::from(&receipt.message),
            delivered: receipt.delivery.delivered,
            missed: receipt.delivery.missed,
            duplicate: receipt.duplicate,
        }
    }
}
