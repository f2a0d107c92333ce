//! 领域实体定义
//!
//! 包含系统的核心实体：房间与消息。

pub mod message;
pub mod room;

// 重新导出核心实体
pub use message::{Message, NewMessage};
pub use room::{Room, RoomKind, RoomSummary};
